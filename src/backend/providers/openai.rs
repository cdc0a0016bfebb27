//! OpenAI Images API backend (gpt-image-1, DALL-E 3, DALL-E 2)

use async_trait::async_trait;
use reqwest::{multipart::Form, Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::http;
use crate::backend::providers::ProviderContext;
use crate::backend::traits::{
    Capabilities, EditRequest, GeneratedImage, GenerationRequest, GenerationResult, ImageBackend,
    ImageFormat, Operation,
};
use crate::error::{AppError, Result};
use crate::resilience::{fingerprint, CallSpec, ResilienceContext};
use crate::response::image_dimensions;

pub const NAME: &str = "openai";
pub const API_KEY: &str = "OPENAI_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-image-1";
const MODELS: &[&str] = &["gpt-image-1", "dall-e-3", "dall-e-2"];

pub struct OpenAiBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    max_payload_bytes: usize,
    shell: Arc<ResilienceContext>,
}

#[derive(Debug, Serialize)]
struct ApiGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_format: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ApiImagesResponse {
    #[serde(default)]
    data: Vec<ApiImageData>,
}

#[derive(Debug, Deserialize)]
struct ApiImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

impl OpenAiBackend {
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

    fn is_gpt_image(model: &str) -> bool {
        model.starts_with("gpt-image")
    }

    async fn collect(&self, response: Response, model: &str, format: ImageFormat) -> Result<GenerationResult> {
        let body: ApiImagesResponse = http::read_json(NAME, response).await?;

        let mut images = Vec::with_capacity(body.data.len());
        for item in body.data {
            let mut image: GeneratedImage = match (item.b64_json, item.url) {
                (Some(b64), _) => http::decode_image(NAME, &b64, Some(format), self.max_payload_bytes)?,
                (None, Some(url)) => {
                    http::download_image(&self.client, NAME, &url, self.max_payload_bytes).await?
                }
                (None, None) => continue,
            };
            image.revised_prompt = item.revised_prompt;
            images.push(image);
        }

        Ok(GenerationResult::new(NAME, images).with_model(model))
    }
}

/// Map requested dimensions onto the sizes a model accepts
fn fit_size(model: &str, width: u32, height: u32) -> &'static str {
    let landscape = width as f64 > height as f64 * 1.1;
    let portrait = height as f64 > width as f64 * 1.1;

    match model {
        "dall-e-2" => match width.max(height) {
            0..=256 => "256x256",
            257..=512 => "512x512",
            _ => "1024x1024",
        },
        "dall-e-3" if landscape => "1792x1024",
        "dall-e-3" if portrait => "1024x1792",
        _ if landscape => "1536x1024",
        _ if portrait => "1024x1536",
        _ => "1024x1024",
    }
}

fn size_warning(request: &GenerationRequest, size: &str) -> Option<String> {
    let (width, height) = (request.width?, request.height?);
    let requested = format!("{}x{}", width, height);
    (requested != size).then(|| format!("OpenAI does not support {}; generated at {}", requested, size))
}

#[async_trait]
impl ImageBackend for OpenAiBackend {
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
            max_width: 1792,
            max_height: 1792,
            models: MODELS.iter().map(|m| m.to_string()).collect(),
            features: vec![
                "text-rendering".to_string(),
                "inpainting".to_string(),
                "prompt-revision".to_string(),
            ],
            edit_preserves_aspect_ratio: true,
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.api_key()?;
        let model = request.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let (width, height) = request.size_or(1024);
        let size = fit_size(model, width, height);
        let format = request.output_format.unwrap_or(ImageFormat::Png);
        let gpt_image = Self::is_gpt_image(model);

        let body = ApiGenerateRequest {
            model,
            prompt: &request.prompt,
            n: 1,
            size,
            response_format: (!gpt_image).then_some("b64_json"),
            output_format: gpt_image.then_some(match format {
                ImageFormat::Png => "png",
                ImageFormat::Jpeg => "jpeg",
                ImageFormat::Webp => "webp",
            }),
        };
        let url = format!("{}/v1/images/generations", self.base_url);

        let call = CallSpec {
            backend: NAME,
            operation: Operation::Generate,
            prompt: &request.prompt,
            cache_key: fingerprint(NAME, Operation::Generate, request, &[]),
            timeout: self.timeout,
        };

        let (body, url) = (&body, &url);
        let mut result = self
            .shell
            .execute(call, move |_deadline| async move {
                let response = http::send(NAME, self.client.post(url).bearer_auth(key).json(body)).await?;
                self.collect(response, model, format).await
            })
            .await?;

        if let Some(warning) = size_warning(request, size) {
            result.warnings.push(warning);
        }
        Ok(result)
    }

    async fn edit(&self, request: &EditRequest) -> Result<GenerationResult> {
        let key = self.api_key()?;
        let generation = &request.generation;
        let model = generation.model.as_deref().unwrap_or(DEFAULT_MODEL);
        if model == "dall-e-3" {
            return Err(AppError::invalid_input(NAME, "dall-e-3 does not support edits; use gpt-image-1 or dall-e-2"));
        }

        let image = request.image.load(NAME, "image", self.max_payload_bytes).await?;
        let mask = match &request.mask {
            Some(mask) => Some(mask.load(NAME, "mask", self.max_payload_bytes).await?),
            None => None,
        };

        // Without explicit dimensions, keep the input's orientation
        let (width, height) = match (generation.width, generation.height) {
            (Some(w), Some(h)) => (w, h),
            _ => image_dimensions(&image).unwrap_or((1024, 1024)),
        };
        let size = fit_size(model, width, height);
        let format = generation.output_format.unwrap_or(ImageFormat::Png);
        let gpt_image = Self::is_gpt_image(model);

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

        let url = format!("{}/v1/images/edits", self.base_url);
        let (url, image, mask, prompt) = (&url, &image, mask.as_ref(), request.prompt());
        let mut result = self
            .shell
            .execute(call, move |_deadline| async move {
                let mut form = Form::new()
                    .text("model", model.to_string())
                    .text("prompt", prompt.to_string())
                    .text("n", "1")
                    .text("size", size)
                    .part("image", http::image_part(NAME, "image", image)?);
                if let Some(mask) = mask {
                    form = form.part("mask", http::image_part(NAME, "mask", mask)?);
                }
                if !gpt_image {
                    form = form.text("response_format", "b64_json");
                }

                let response = http::send(NAME, self.client.post(url).bearer_auth(key).multipart(form)).await?;
                self.collect(response, model, format).await
            })
            .await?;

        if let Some(warning) = size_warning(generation, size) {
            result.warnings.push(warning);
        }
        Ok(result)
    }
}
