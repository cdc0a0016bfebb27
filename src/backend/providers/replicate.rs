//! Replicate predictions backend (hosted open models, generation only)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::backend::http;
use crate::backend::poll::{JobPoller, PollStatus};
use crate::backend::providers::ProviderContext;
use crate::backend::traits::{
    Capabilities, GenerationRequest, GenerationResult, ImageBackend, ImageFormat, Operation,
};
use crate::error::{AppError, Result};
use crate::resilience::{fingerprint, CallSpec, ResilienceContext};

pub const NAME: &str = "replicate";
pub const API_KEY: &str = "REPLICATE_API_TOKEN";
const DEFAULT_BASE_URL: &str = "https://api.replicate.com";
const DEFAULT_MODEL: &str = "black-forest-labs/flux-schnell";
const MODELS: &[&str] = &[
    "black-forest-labs/flux-schnell",
    "black-forest-labs/flux-dev",
    "stability-ai/sdxl",
];
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_SIDE: u32 = 1440;

const ASPECT_RATIOS: &[(&str, u32, u32)] = &[
    ("1:1", 1, 1),
    ("16:9", 16, 9),
    ("9:16", 9, 16),
    ("4:3", 4, 3),
    ("3:4", 3, 4),
    ("3:2", 3, 2),
    ("2:3", 2, 3),
    ("21:9", 21, 9),
];

pub struct ReplicateBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    max_payload_bytes: usize,
    shell: Arc<ResilienceContext>,
}

#[derive(Debug, Serialize)]
struct ApiPredictionRequest<'a> {
    input: ApiInput<'a>,
}

#[derive(Debug, Serialize)]
struct ApiInput<'a> {
    prompt: &'a str,
    aspect_ratio: &'a str,
    output_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_inference_steps: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiPrediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<ApiUrls>,
}

#[derive(Debug, Deserialize)]
struct ApiUrls {
    #[serde(default)]
    get: Option<String>,
}

/// Output URLs; models return either a single string or a list
fn output_urls(output: Option<Value>) -> Vec<String> {
    match output {
        Some(Value::String(url)) => vec![url],
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn format_field(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Webp => "webp",
        ImageFormat::Png => "png",
    }
}

impl ReplicateBackend {
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
            .ok_or_else(|| AppError::not_configured(NAME, format!("set {} to a valid API token", API_KEY)))
    }

    async fn predict(
        &self,
        key: &str,
        model: &str,
        body: &ApiPredictionRequest<'_>,
        deadline: Instant,
    ) -> Result<GenerationResult> {
        let url = format!("{}/v1/models/{}/predictions", self.base_url, model);
        let response = http::send(NAME, self.client.post(&url).bearer_auth(key).json(body)).await?;
        let prediction: ApiPrediction = http::read_json(NAME, response).await?;

        let poll_url = prediction
            .urls
            .as_ref()
            .and_then(|u| u.get.clone())
            .unwrap_or_else(|| format!("{}/v1/predictions/{}", self.base_url, prediction.id));
        let poll_url = poll_url.as_str();

        let urls = match classify(prediction)? {
            PollStatus::Ready(urls) => urls,
            PollStatus::Failed(reason) => {
                return Err(AppError::transient(NAME, format!("prediction failed: {}", reason)))
            }
            PollStatus::Pending => {
                let job_id = poll_url.rsplit('/').next().unwrap_or_default().to_string();
                JobPoller::new(POLL_INTERVAL, deadline)
                    .run(NAME, &job_id, move || self.poll(key, poll_url))
                    .await?
            }
        };

        let mut images = Vec::with_capacity(urls.len());
        for url in urls {
            images.push(http::download_image(&self.client, NAME, &url, self.max_payload_bytes).await?);
        }
        Ok(GenerationResult::new(NAME, images).with_model(model))
    }

    async fn poll(&self, key: &str, poll_url: &str) -> Result<PollStatus<Vec<String>>> {
        let response = http::send(NAME, self.client.get(poll_url).bearer_auth(key)).await?;
        let prediction: ApiPrediction = http::read_json(NAME, response).await?;
        classify(prediction)
    }
}

fn classify(prediction: ApiPrediction) -> Result<PollStatus<Vec<String>>> {
    match prediction.status.as_str() {
        "succeeded" => {
            let urls = output_urls(prediction.output);
            if urls.is_empty() {
                Err(AppError::transient(NAME, "prediction succeeded without output"))
            } else {
                Ok(PollStatus::Ready(urls))
            }
        }
        "starting" | "processing" => Ok(PollStatus::Pending),
        "canceled" => Ok(PollStatus::Failed("prediction was canceled".to_string())),
        _ => {
            let reason = prediction
                .error
                .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                .unwrap_or_else(|| prediction.status.clone());
            if reason.to_lowercase().contains("nsfw") {
                return Err(AppError::invalid_input(NAME, format!("output was flagged: {}", reason)));
            }
            Ok(PollStatus::Failed(reason))
        }
    }
}

#[async_trait]
impl ImageBackend for ReplicateBackend {
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
            edit: false,
            max_width: MAX_SIDE,
            max_height: MAX_SIDE,
            models: MODELS.iter().map(|m| m.to_string()).collect(),
            features: vec!["fast".to_string(), "open-models".to_string()],
            edit_preserves_aspect_ratio: false,
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.api_key()?;
        let model = request.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let (width, height) = request.size_or(1024);
        let aspect_ratio = http::closest_aspect_ratio(width, height, ASPECT_RATIOS);

        let body = ApiPredictionRequest {
            input: ApiInput {
                prompt: &request.prompt,
                aspect_ratio,
                output_format: format_field(request.output_format.unwrap_or(ImageFormat::Png)),
                seed: request.seed,
                num_inference_steps: request.steps,
            },
        };

        let call = CallSpec {
            backend: NAME,
            operation: Operation::Generate,
            prompt: &request.prompt,
            cache_key: fingerprint(NAME, Operation::Generate, request, &[]),
            timeout: self.timeout,
        };

        let body = &body;
        self.shell
            .execute(call, move |deadline| self.predict(key, model, body, deadline))
            .await
    }
}
