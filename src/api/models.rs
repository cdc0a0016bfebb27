//! Request and response bodies for the HTTP surface

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::backend::traits::{
    EditRequest, GeneratedImage, GenerationRequest, GenerationResult, ImageFormat, ImageReference,
};
use crate::error::{AppError, Result};
use crate::response::{base64, ResponseFormat};

/// Backend label for errors raised before any backend is involved
const REQUEST: &str = "request";

/// Body of `POST /v1/images/generations`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateImageRequest {
    pub prompt: String,

    /// Backend name or "auto"
    #[serde(default)]
    pub backend: Option<String>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    /// "WxH"; used when width/height are absent
    #[serde(default)]
    pub size: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub seed: Option<i64>,

    #[serde(default)]
    pub guidance_scale: Option<f32>,

    #[serde(default)]
    pub steps: Option<u32>,

    #[serde(default)]
    pub output_format: Option<String>,

    /// "b64_json" (default) or "file"
    #[serde(default)]
    pub response_format: Option<String>,
}

impl GenerateImageRequest {
    pub fn response_format(&self) -> ResponseFormat {
        self.response_format
            .as_deref()
            .map(ResponseFormat::from_str)
            .unwrap_or(ResponseFormat::Base64Json)
    }

    pub fn to_generation(&self) -> Result<GenerationRequest> {
        let (width, height) = match (self.width, self.height, self.size.as_deref()) {
            (None, None, Some(size)) => {
                let (w, h) = parse_size(size).ok_or_else(|| {
                    AppError::invalid_input(REQUEST, format!("size '{}' must look like 1024x768", size))
                })?;
                (Some(w), Some(h))
            }
            (w, h, _) => (w, h),
        };
        if width == Some(0) || height == Some(0) {
            return Err(AppError::invalid_input(REQUEST, "width and height must be positive"));
        }

        let output_format = self
            .output_format
            .as_deref()
            .map(|f| {
                ImageFormat::parse(f).ok_or_else(|| {
                    AppError::invalid_input(
                        REQUEST,
                        format!("output_format '{}' is not one of png, jpeg, webp", f),
                    )
                })
            })
            .transpose()?;

        Ok(GenerationRequest {
            prompt: self.prompt.clone(),
            backend: self.backend.clone(),
            width,
            height,
            model: self.model.clone(),
            seed: self.seed,
            guidance_scale: self.guidance_scale,
            steps: self.steps,
            output_format,
        })
    }
}

/// Body of `POST /v1/images/edits`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditImageRequest {
    #[serde(flatten)]
    pub params: GenerateImageRequest,

    /// Base64 or data URL
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub image_path: Option<PathBuf>,

    #[serde(default)]
    pub mask: Option<String>,

    #[serde(default)]
    pub mask_path: Option<PathBuf>,
}

impl EditImageRequest {
    pub fn to_edit(&self) -> Result<EditRequest> {
        let image = reference(self.image.as_ref(), self.image_path.as_ref())
            .ok_or_else(|| AppError::invalid_input(REQUEST, "either image or image_path is required"))?;

        Ok(EditRequest {
            generation: self.params.to_generation()?,
            image,
            mask: reference(self.mask.as_ref(), self.mask_path.as_ref()),
        })
    }
}

fn reference(inline: Option<&String>, path: Option<&PathBuf>) -> Option<ImageReference> {
    match (inline, path) {
        (Some(data), _) => Some(ImageReference::Inline(data.clone())),
        (None, Some(path)) => Some(ImageReference::File(path.clone())),
        (None, None) => None,
    }
}

/// Parse "WxH" (also accepts "W*H" and "W×H")
pub fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size
        .trim()
        .split_once(|c| c == 'x' || c == 'X' || c == '*' || c == '×')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// One image in a response
#[derive(Debug, Clone, Serialize)]
pub struct ImageData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub format: ImageFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl ImageData {
    pub fn inline(image: &GeneratedImage) -> Self {
        Self {
            b64_json: Some(base64::encode(&image.data)),
            path: None,
            format: image.format,
            revised_prompt: image.revised_prompt.clone(),
            seed: image.seed,
        }
    }

    pub fn file(image: &GeneratedImage, path: String) -> Self {
        Self {
            b64_json: None,
            path: Some(path),
            format: image.format,
            revised_prompt: image.revised_prompt.clone(),
            seed: image.seed,
        }
    }
}

/// Response for generate and edit
#[derive(Debug, Clone, Serialize)]
pub struct ImageResponse {
    pub created: i64,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub warnings: Vec<String>,
    pub data: Vec<ImageData>,
}

impl ImageResponse {
    pub fn new(result: &GenerationResult, data: Vec<ImageData>) -> Self {
        Self {
            created: chrono::Utc::now().timestamp(),
            backend: result.backend.clone(),
            model: result.model.clone(),
            warnings: result.warnings.clone(),
            data,
        }
    }
}

/// `GET /v1/backends/configured`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfiguredBackendsResponse {
    pub generate: Vec<String>,
    pub edit: Vec<String>,
}

/// `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub configured_backends: usize,
}
