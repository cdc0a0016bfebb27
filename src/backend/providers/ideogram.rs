//! Ideogram v3 backend, strongest at rendering legible text

use async_trait::async_trait;
use reqwest::{multipart::Form, Client, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::http;
use crate::backend::providers::ProviderContext;
use crate::backend::traits::{
    Capabilities, EditRequest, GenerationRequest, GenerationResult, ImageBackend, Operation,
};
use crate::error::{AppError, Result};
use crate::resilience::{fingerprint, CallSpec, ResilienceContext};

pub const NAME: &str = "ideogram";
pub const API_KEY: &str = "IDEOGRAM_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.ideogram.ai";
const DEFAULT_SPEED: &str = "DEFAULT";
const SPEEDS: &[&str] = &["TURBO", "DEFAULT", "QUALITY"];

const ASPECT_RATIOS: &[(&str, u32, u32)] = &[
    ("1x1", 1, 1),
    ("16x9", 16, 9),
    ("9x16", 9, 16),
    ("4x3", 4, 3),
    ("3x4", 3, 4),
    ("3x2", 3, 2),
    ("2x3", 2, 3),
    ("16x10", 16, 10),
    ("10x16", 10, 16),
    ("3x1", 3, 1),
    ("1x3", 1, 3),
];

pub struct IdeogramBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    max_payload_bytes: usize,
    shell: Arc<ResilienceContext>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Vec<ApiImage>,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    seed: Option<i64>,
    #[serde(default)]
    is_image_safe: Option<bool>,
}

/// Rendering speed; the model field doubles as the speed selector
fn rendering_speed(model: Option<&str>) -> &'static str {
    let requested = model.map(str::to_uppercase);
    SPEEDS
        .iter()
        .find(|speed| Some(**speed) == requested.as_deref())
        .copied()
        .unwrap_or(DEFAULT_SPEED)
}

impl IdeogramBackend {
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

    async fn collect(&self, response: Response, speed: &str) -> Result<GenerationResult> {
        let body: ApiResponse = http::read_json(NAME, response).await?;

        let mut images = Vec::with_capacity(body.data.len());
        let mut filtered = 0;
        for item in body.data {
            if item.is_image_safe == Some(false) {
                filtered += 1;
                continue;
            }
            let Some(url) = item.url else { continue };
            let mut image = http::download_image(&self.client, NAME, &url, self.max_payload_bytes).await?;
            image.revised_prompt = item.prompt;
            image.seed = item.seed;
            images.push(image);
        }

        if images.is_empty() && filtered > 0 {
            return Err(AppError::invalid_input(NAME, "all outputs were flagged as unsafe"));
        }

        let mut result = GenerationResult::new(NAME, images).with_model(format!("ideogram-v3-{}", speed.to_lowercase()));
        if filtered > 0 {
            result
                .warnings
                .push(format!("{} output(s) were withheld by the safety filter", filtered));
        }
        Ok(result)
    }
}

#[async_trait]
impl ImageBackend for IdeogramBackend {
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
            models: SPEEDS.iter().map(|s| s.to_lowercase()).collect(),
            features: vec![
                "text-rendering".to_string(),
                "typography".to_string(),
                "inpainting".to_string(),
                "remix".to_string(),
            ],
            edit_preserves_aspect_ratio: true,
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.api_key()?;
        let speed = rendering_speed(request.model.as_deref());
        let (width, height) = request.size_or(1024);
        let aspect_ratio = http::closest_aspect_ratio(width, height, ASPECT_RATIOS);
        let url = format!("{}/v1/ideogram-v3/generate", self.base_url);

        let call = CallSpec {
            backend: NAME,
            operation: Operation::Generate,
            prompt: &request.prompt,
            cache_key: fingerprint(NAME, Operation::Generate, request, &[]),
            timeout: self.timeout,
        };

        let url = &url;
        let mut result = self
            .shell
            .execute(call, move |_deadline| async move {
                let mut form = Form::new()
                    .text("prompt", request.prompt.clone())
                    .text("aspect_ratio", aspect_ratio)
                    .text("rendering_speed", speed);
                if let Some(seed) = request.seed {
                    form = form.text("seed", seed.to_string());
                }

                let builder = self.client.post(url).header("Api-Key", key).multipart(form);
                let response = http::send(NAME, builder).await?;
                self.collect(response, speed).await
            })
            .await?;

        let exact = ASPECT_RATIOS
            .iter()
            .any(|(label, rw, rh)| *label == aspect_ratio && width * rh == height * rw);
        if let (Some(w), Some(h), false) = (request.width, request.height, exact) {
            result.warnings.push(format!(
                "Ideogram sizes by aspect ratio; {}x{} was mapped to {}",
                w, h, aspect_ratio
            ));
        }
        Ok(result)
    }

    async fn edit(&self, request: &EditRequest) -> Result<GenerationResult> {
        let key = self.api_key()?;
        let generation = &request.generation;
        let speed = rendering_speed(generation.model.as_deref());
        let image = request.image.load(NAME, "image", self.max_payload_bytes).await?;
        let mask = match &request.mask {
            Some(mask) => Some(mask.load(NAME, "mask", self.max_payload_bytes).await?),
            None => None,
        };

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

        // Masked edits inpaint; without a mask the whole image is remixed
        let path = if mask.is_some() { "edit" } else { "remix" };
        let url = format!("{}/v1/ideogram-v3/{}", self.base_url, path);
        let (url, image, mask) = (&url, &image, mask.as_ref());
        self.shell
            .execute(call, move |_deadline| async move {
                let mut form = Form::new()
                    .text("prompt", generation.prompt.clone())
                    .text("rendering_speed", speed)
                    .part("image", http::image_part(NAME, "image", image)?);
                if let Some(mask) = mask {
                    form = form.part("mask", http::image_part(NAME, "mask", mask)?);
                }
                if let Some(seed) = generation.seed {
                    form = form.text("seed", seed.to_string());
                }

                let builder = self.client.post(url).header("Api-Key", key).multipart(form);
                let response = http::send(NAME, builder).await?;
                self.collect(response, speed).await
            })
            .await
    }
}
