//! Black Forest Labs FLUX backend (submit, then poll for the result)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::backend::http;
use crate::backend::poll::{JobPoller, PollStatus};
use crate::backend::providers::ProviderContext;
use crate::backend::traits::{
    Capabilities, EditRequest, GenerationRequest, GenerationResult, ImageBackend, ImageFormat,
    Operation,
};
use crate::error::{AppError, Result};
use crate::resilience::{fingerprint, CallSpec, ResilienceContext};
use crate::response::base64;

pub const NAME: &str = "bfl";
pub const API_KEY: &str = "BFL_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.bfl.ai";
const DEFAULT_MODEL: &str = "flux-pro-1.1";
const EDIT_MODEL: &str = "flux-kontext-pro";
const MODELS: &[&str] = &["flux-pro-1.1", "flux-pro-1.1-ultra", "flux-dev", "flux-kontext-pro"];
const POLL_INTERVAL: Duration = Duration::from_millis(1500);
const MIN_SIDE: u32 = 256;
const MAX_SIDE: u32 = 1440;

pub struct BflBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    max_payload_bytes: usize,
    shell: Arc<ResilienceContext>,
}

#[derive(Debug, Serialize)]
struct ApiGenerateRequest<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance: Option<f32>,
    output_format: &'static str,
}

#[derive(Debug, Serialize)]
struct ApiEditRequest<'a> {
    prompt: &'a str,
    input_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    output_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiSubmitResponse {
    id: String,
    #[serde(default)]
    polling_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResultResponse {
    status: String,
    #[serde(default)]
    result: Option<ApiResult>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    sample: String,
}

/// Snap a side length to FLUX's multiple-of-32 grid within its bounds
fn snap(side: u32) -> u32 {
    let clamped = side.clamp(MIN_SIDE, MAX_SIDE);
    ((clamped + 16) / 32 * 32).min(MAX_SIDE)
}

fn format_field(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpeg",
        _ => "png",
    }
}

impl BflBackend {
    pub fn new(ctx: &ProviderContext) -> Self {
        Self {
            client: ctx.client.clone(),
            api_key: ctx.credentials.get(API_KEY).map(str::to_string),
            base_url: ctx.base_url(NAME, DEFAULT_BASE_URL),
            timeout: ctx.timeout(NAME, true),
            max_payload_bytes: ctx.max_payload_bytes(),
            shell: ctx.shell.clone(),
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AppError::not_configured(NAME, format!("set {} to a valid API key", API_KEY)))
    }

    /// Submit a job, poll it under `deadline`, then download the sample
    async fn run_job<T: Serialize + Sync>(
        &self,
        key: &str,
        model: &str,
        body: &T,
        deadline: Instant,
    ) -> Result<GenerationResult> {
        let url = format!("{}/v1/{}", self.base_url, model);
        let response = http::send(NAME, self.client.post(&url).header("x-key", key).json(body)).await?;
        let job: ApiSubmitResponse = http::read_json(NAME, response).await?;

        let poll_url = job
            .polling_url
            .clone()
            .unwrap_or_else(|| format!("{}/v1/get_result?id={}", self.base_url, job.id));
        let poll_url = poll_url.as_str();

        let sample = JobPoller::new(POLL_INTERVAL, deadline)
            .run(NAME, &job.id, move || self.poll(key, poll_url))
            .await?;

        let image = http::download_image(&self.client, NAME, &sample, self.max_payload_bytes).await?;
        Ok(GenerationResult::new(NAME, vec![image]).with_model(model))
    }

    async fn poll(&self, key: &str, poll_url: &str) -> Result<PollStatus<String>> {
        let response = http::send(NAME, self.client.get(poll_url).header("x-key", key)).await?;
        let body: ApiResultResponse = http::read_json(NAME, response).await?;

        match body.status.as_str() {
            "Ready" => body
                .result
                .map(|r| PollStatus::Ready(r.sample))
                .ok_or_else(|| AppError::transient(NAME, "job reported Ready without a sample")),
            "Pending" | "Queued" | "Processing" => Ok(PollStatus::Pending),
            "Request Moderated" | "Content Moderated" => Err(AppError::invalid_input(
                NAME,
                format!("request rejected by moderation ({})", body.status),
            )),
            other => Ok(PollStatus::Failed(other.to_string())),
        }
    }
}

#[async_trait]
impl ImageBackend for BflBackend {
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
            max_width: MAX_SIDE,
            max_height: MAX_SIDE,
            models: MODELS.iter().map(|m| m.to_string()).collect(),
            features: vec![
                "photorealism".to_string(),
                "seed".to_string(),
                "context-editing".to_string(),
            ],
            edit_preserves_aspect_ratio: true,
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.api_key()?;
        let model = request.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let (width, height) = request.size_or(1024);
        let (snapped_w, snapped_h) = (snap(width), snap(height));

        let body = ApiGenerateRequest {
            prompt: &request.prompt,
            width: snapped_w,
            height: snapped_h,
            seed: request.seed,
            steps: request.steps,
            guidance: request.guidance_scale,
            output_format: format_field(request.output_format.unwrap_or(ImageFormat::Png)),
        };

        let call = CallSpec {
            backend: NAME,
            operation: Operation::Generate,
            prompt: &request.prompt,
            cache_key: fingerprint(NAME, Operation::Generate, request, &[]),
            timeout: self.timeout,
        };

        let body = &body;
        let mut result = self
            .shell
            .execute(call, move |deadline| self.run_job(key, model, body, deadline))
            .await?;

        if (snapped_w, snapped_h) != (width, height) && request.width.is_some() {
            result.warnings.push(format!(
                "FLUX requires multiples of 32 between {} and {}; {}x{} was adjusted to {}x{}",
                MIN_SIDE, MAX_SIDE, width, height, snapped_w, snapped_h
            ));
        }
        Ok(result)
    }

    async fn edit(&self, request: &EditRequest) -> Result<GenerationResult> {
        let key = self.api_key()?;
        let generation = &request.generation;
        let image = request.image.load(NAME, "image", self.max_payload_bytes).await?;

        let body = ApiEditRequest {
            prompt: &generation.prompt,
            input_image: base64::encode(&image),
            seed: generation.seed,
            output_format: format_field(generation.output_format.unwrap_or(ImageFormat::Png)),
        };

        let call = CallSpec {
            backend: NAME,
            operation: Operation::Edit,
            prompt: request.prompt(),
            cache_key: fingerprint(NAME, Operation::Edit, generation, &[image.as_slice()]),
            timeout: self.timeout,
        };

        let body = &body;
        let mut result = self
            .shell
            .execute(call, move |deadline| self.run_job(key, EDIT_MODEL, body, deadline))
            .await?;

        if request.mask.is_some() {
            result
                .warnings
                .push("FLUX Kontext edits from the prompt alone; the mask was ignored".to_string());
        }
        Ok(result)
    }
}
