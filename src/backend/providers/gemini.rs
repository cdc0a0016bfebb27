//! Google Gemini native image generation backend

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
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
use crate::response::{base64, detect_format};

pub const NAME: &str = "gemini";
pub const API_KEY: &str = "GEMINI_API_KEY";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
const MODELS: &[&str] = &["gemini-2.5-flash-image", "gemini-2.0-flash-preview-image-generation"];

pub struct GeminiBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    max_payload_bytes: usize,
    shell: Arc<ResilienceContext>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    generation_config: ApiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct ApiContent {
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ApiPart {
    Text(String),
    InlineData(ApiInlineData),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    response_modalities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseContent {
    #[serde(default)]
    parts: Vec<ApiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<ApiInlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "IMAGE_SAFETY", "BLOCKLIST"];

impl GeminiBackend {
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

    async fn call(&self, key: &str, model: &str, body: &ApiRequest) -> Result<GenerationResult> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let builder = self.client.post(&url).header("x-goog-api-key", key).json(body);
        let response = http::send(NAME, builder).await?;
        let body: ApiResponse = http::read_json(NAME, response).await?;
        self.collect(body, model)
    }

    fn collect(&self, body: ApiResponse, model: &str) -> Result<GenerationResult> {
        if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(AppError::invalid_input(NAME, format!("prompt was blocked ({})", reason)));
        }

        let mut images = Vec::new();
        let mut commentary = Vec::new();
        for candidate in body.candidates {
            if let Some(reason) = candidate.finish_reason.as_deref() {
                if BLOCKED_FINISH_REASONS.contains(&reason) {
                    return Err(AppError::invalid_input(NAME, format!("output was blocked ({})", reason)));
                }
            }
            let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
            for part in parts {
                if let Some(inline) = part.inline_data {
                    let declared = inline
                        .mime_type
                        .strip_prefix("image/")
                        .and_then(ImageFormat::parse);
                    images.push(http::decode_image(NAME, &inline.data, declared, self.max_payload_bytes)?);
                } else if let Some(text) = part.text {
                    commentary.push(text);
                }
            }
        }

        // A text-only reply is the model declining to draw
        if images.is_empty() && !commentary.is_empty() {
            return Err(AppError::invalid_input(
                NAME,
                format!("model replied without an image: {}", commentary.join(" ")),
            ));
        }
        Ok(GenerationResult::new(NAME, images).with_model(model))
    }
}

fn generation_config(seed: Option<i64>) -> ApiGenerationConfig {
    ApiGenerationConfig {
        response_modalities: vec!["TEXT", "IMAGE"],
        seed,
    }
}

fn inline_part(data: &[u8]) -> ApiPart {
    let format = detect_format(data).unwrap_or(ImageFormat::Png);
    ApiPart::InlineData(ApiInlineData {
        mime_type: format.mime_type().to_string(),
        data: base64::encode(data),
    })
}

#[async_trait]
impl ImageBackend for GeminiBackend {
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
            max_width: 1024,
            max_height: 1024,
            models: MODELS.iter().map(|m| m.to_string()).collect(),
            features: vec!["conversational-editing".to_string(), "multimodal".to_string()],
            edit_preserves_aspect_ratio: false,
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.api_key()?;
        let model = request.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let body = ApiRequest {
            contents: vec![ApiContent {
                parts: vec![ApiPart::Text(request.prompt.clone())],
            }],
            generation_config: generation_config(request.seed),
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
            .execute(call, move |_deadline| self.call(key, model, body))
            .await?;

        if request.width.is_some() || request.height.is_some() {
            result
                .warnings
                .push("Gemini chooses its own output size; requested dimensions were ignored".to_string());
        }
        Ok(result)
    }

    async fn edit(&self, request: &EditRequest) -> Result<GenerationResult> {
        let key = self.api_key()?;
        let generation = &request.generation;
        let model = generation.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let image = request.image.load(NAME, "image", self.max_payload_bytes).await?;

        let body = ApiRequest {
            contents: vec![ApiContent {
                parts: vec![ApiPart::Text(generation.prompt.clone()), inline_part(&image)],
            }],
            generation_config: generation_config(generation.seed),
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
            .execute(call, move |_deadline| self.call(key, model, body))
            .await?;

        if request.mask.is_some() {
            result
                .warnings
                .push("Gemini edits from the prompt alone; the mask was ignored".to_string());
        }
        Ok(result)
    }
}
