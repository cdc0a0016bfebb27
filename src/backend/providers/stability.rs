//! Stability AI Stable Image backend (Core, Ultra, SD3.5)

use async_trait::async_trait;
use reqwest::{header::ACCEPT, multipart::Form, Client, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::http;
use crate::backend::providers::ProviderContext;
use crate::backend::traits::{
    Capabilities, EditRequest, GenerationRequest, GenerationResult, ImageBackend, ImageFormat,
    Operation,
};
use crate::error::{AppError, Result};
use crate::resilience::{fingerprint, CallSpec, ResilienceContext};

pub const NAME: &str = "stability";
pub const API_KEY: &str = "STABILITY_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.stability.ai";
const MODELS: &[&str] = &["core", "ultra", "sd3.5-large", "sd3.5-large-turbo", "sd3.5-medium"];

const ASPECT_RATIOS: &[(&str, u32, u32)] = &[
    ("1:1", 1, 1),
    ("16:9", 16, 9),
    ("21:9", 21, 9),
    ("2:3", 2, 3),
    ("3:2", 3, 2),
    ("4:5", 4, 5),
    ("5:4", 5, 4),
    ("9:16", 9, 16),
    ("9:21", 9, 21),
];

pub struct StabilityBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    max_payload_bytes: usize,
    shell: Arc<ResilienceContext>,
}

#[derive(Debug, Deserialize)]
struct ApiImageResponse {
    image: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    seed: Option<i64>,
}

/// Endpoint path and optional `model` field for a model name
fn route(model: Option<&str>) -> (&'static str, Option<String>) {
    match model {
        Some("ultra") => ("generate/ultra", None),
        Some(m) if m.starts_with("sd3") => ("generate/sd3", Some(m.to_string())),
        _ => ("generate/core", None),
    }
}

fn format_field(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Webp => "webp",
    }
}

impl StabilityBackend {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self {
            client: ctx.client.clone(),
            api_key: ctx.credentials.get(API_KEY).map(str::to_string),
            base_url: ctx.base_url(NAME, DEFAULT_BASE_URL),
            timeout: ctx.timeout(NAME, false),
            max_payload_bytes: ctx.max_payload_bytes(),
            shell: ctx.shell.clone(),
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AppError::not_configured(NAME, format!("set {} to a valid API key", API_KEY)))
    }

    async fn collect(&self, response: Response, model: &str, format: ImageFormat) -> Result<GenerationResult> {
        let body: ApiImageResponse = http::read_json(NAME, response).await?;

        if body.finish_reason.as_deref() == Some("CONTENT_FILTERED") {
            return Err(AppError::invalid_input(NAME, "output was blocked by the content filter"));
        }

        let encoded = body
            .image
            .ok_or_else(|| AppError::transient(NAME, "response did not include an image"))?;
        let mut image = http::decode_image(NAME, &encoded, Some(format), self.max_payload_bytes)?;
        image.seed = body.seed;

        Ok(GenerationResult::new(NAME, vec![image]).with_model(model))
    }
}

#[async_trait]
impl ImageBackend for StabilityBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn required_credentials(&self) -> Vec<String> {
        vec![API_KEY.to_string()]
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            generate: true,
            edit: true,
            max_width: 1536,
            max_height: 1536,
            models: MODELS.iter().map(|m| m.to_string()).collect(),
            features: vec![
                "aspect-ratio".to_string(),
                "seed".to_string(),
                "inpainting".to_string(),
            ],
            edit_preserves_aspect_ratio: true,
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.api_key()?;
        let (path, model_field) = route(request.model.as_deref());
        let model = model_field.clone().unwrap_or_else(|| path.trim_start_matches("generate/").to_string());
        let (width, height) = request.size_or(1024);
        let aspect_ratio = http::closest_aspect_ratio(width, height, ASPECT_RATIOS);
        let format = request.output_format.unwrap_or(ImageFormat::Png);
        let url = format!("{}/v2beta/stable-image/{}", self.base_url, path);

        let call = CallSpec {
            backend: NAME,
            operation: Operation::Generate,
            prompt: &request.prompt,
            cache_key: fingerprint(NAME, Operation::Generate, request, &[]),
            timeout: self.timeout,
        };

        let (url, model, model_field) = (&url, &model, &model_field);
        let mut result = self
            .shell
            .execute(call, move |_deadline| async move {
                let mut form = Form::new()
                    .text("prompt", request.prompt.clone())
                    .text("aspect_ratio", aspect_ratio)
                    .text("output_format", format_field(format));
                if let Some(seed) = request.seed {
                    form = form.text("seed", seed.to_string());
                }
                if let Some(model) = model_field {
                    form = form.text("model", model.clone());
                }
                if let Some(cfg) = request.guidance_scale {
                    form = form.text("cfg_scale", cfg.to_string());
                }

                let builder = self
                    .client
                    .post(url)
                    .bearer_auth(key)
                    .header(ACCEPT, "application/json")
                    .multipart(form);
                let response = http::send(NAME, builder).await?;
                self.collect(response, model, format).await
            })
            .await?;

        let exact = ASPECT_RATIOS
            .iter()
            .any(|(label, rw, rh)| *label == aspect_ratio && width * rh == height * rw);
        if let (Some(w), Some(h), false) = (request.width, request.height, exact) {
            result.warnings.push(format!(
                "Stability sizes by aspect ratio; {}x{} was mapped to {}",
                w, h, aspect_ratio
            ));
        }
        Ok(result)
    }

    async fn edit(&self, request: &EditRequest) -> Result<GenerationResult> {
        let key = self.api_key()?;
        let generation = &request.generation;
        let image = request.image.load(NAME, "image", self.max_payload_bytes).await?;
        let mask = match &request.mask {
            Some(mask) => Some(mask.load(NAME, "mask", self.max_payload_bytes).await?),
            None => None,
        };
        let format = generation.output_format.unwrap_or(ImageFormat::Png);

        let mut inputs: Vec<&[u8]> = vec![image.as_slice()];
        if let Some(mask) = &mask {
            inputs.push(mask.as_slice());
        }

        let call = CallSpec {
            backend: NAME,
            operation: Operation::Edit,
            prompt: request.prompt(),
            cache_key: fingerprint(NAME, Operation::Edit, generation, &inputs),
            timeout: self.timeout,
        };

        let url = format!("{}/v2beta/stable-image/edit/inpaint", self.base_url);
        let (url, image, mask) = (&url, &image, mask.as_ref());
        self.shell
            .execute(call, move |_deadline| async move {
                let mut form = Form::new()
                    .text("prompt", generation.prompt.clone())
                    .text("output_format", format_field(format))
                    .part("image", http::image_part(NAME, "image", image)?);
                if let Some(mask) = mask {
                    form = form.part("mask", http::image_part(NAME, "mask", mask)?);
                }
                if let Some(seed) = generation.seed {
                    form = form.text("seed", seed.to_string());
                }

                let builder = self
                    .client
                    .post(url)
                    .bearer_auth(key)
                    .header(ACCEPT, "application/json")
                    .multipart(form);
                let response = http::send(NAME, builder).await?;
                self.collect(response, "inpaint", format).await
            })
            .await
    }
}
