//! Common traits and types for image generation backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::resilience::validation::validate_payload;
use crate::response::base64;

/// Encoded image formats a backend can return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    /// Parse a user-supplied format name, accepting common aliases
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        })
    }
}

/// The two operations of the backend contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Generate,
    Edit,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generate => "generate",
            Self::Edit => "edit",
        })
    }
}

/// Request to generate images
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The prompt to generate images from
    pub prompt: String,

    /// Backend name or "auto"; `None` defers to the configured default
    #[serde(default)]
    pub backend: Option<String>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    /// Model identifier
    #[serde(default)]
    pub model: Option<String>,

    /// Random seed for reproducibility
    #[serde(default)]
    pub seed: Option<i64>,

    /// Guidance scale / CFG scale
    #[serde(default)]
    pub guidance_scale: Option<f32>,

    /// Number of inference steps
    #[serde(default)]
    pub steps: Option<u32>,

    #[serde(default)]
    pub output_format: Option<ImageFormat>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Requested dimensions, falling back to `default` for unset axes
    pub fn size_or(&self, default: u32) -> (u32, u32) {
        (self.width.unwrap_or(default), self.height.unwrap_or(default))
    }
}

/// Where an input image comes from
#[derive(Debug, Clone)]
pub enum ImageReference {
    /// Base64 text or a `data:image/...;base64,` URL
    Inline(String),
    /// Path to an image on local disk
    File(PathBuf),
    /// Already decoded bytes
    Bytes(Arc<Vec<u8>>),
}

impl ImageReference {
    /// Resolve the reference to raw bytes, enforcing the payload ceiling.
    ///
    /// Files are size-checked from metadata before they are read.
    pub async fn load(&self, backend: &str, label: &str, max_bytes: usize) -> Result<Arc<Vec<u8>>> {
        let bytes = match self {
            ImageReference::Inline(encoded) => {
                // Base64 inflates by 4/3; reject obviously oversized text before decoding
                validate_payload(backend, label, encoded.len() / 4 * 3, max_bytes)?;
                let decoded = base64::decode(encoded)
                    .map_err(|e| AppError::invalid_input(backend, format!("{}: {}", label, e)))?;
                Arc::new(decoded)
            }
            ImageReference::File(path) => {
                let metadata = tokio::fs::metadata(path).await.map_err(|e| {
                    AppError::invalid_input(
                        backend,
                        format!("{} file '{}' is not readable: {}", label, path.display(), e),
                    )
                })?;
                validate_payload(backend, label, metadata.len() as usize, max_bytes)?;
                let data = tokio::fs::read(path).await.map_err(|e| {
                    AppError::invalid_input(
                        backend,
                        format!("{} file '{}' is not readable: {}", label, path.display(), e),
                    )
                })?;
                Arc::new(data)
            }
            ImageReference::Bytes(bytes) => bytes.clone(),
        };

        validate_payload(backend, label, bytes.len(), max_bytes)?;
        if bytes.is_empty() {
            return Err(AppError::invalid_input(backend, format!("{} is empty", label)));
        }
        Ok(bytes)
    }
}

/// Request to edit an existing image
#[derive(Debug, Clone)]
pub struct EditRequest {
    /// Prompt and generation parameters
    pub generation: GenerationRequest,
    /// Image to edit
    pub image: ImageReference,
    /// Optional mask; transparent areas mark the region to change
    pub mask: Option<ImageReference>,
}

impl EditRequest {
    pub fn new(prompt: impl Into<String>, image: ImageReference) -> Self {
        Self {
            generation: GenerationRequest::new(prompt),
            image,
            mask: None,
        }
    }

    pub fn with_mask(mut self, mask: ImageReference) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.generation.prompt
    }
}

/// A single generated image
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    /// Encoded image bytes
    pub data: Vec<u8>,

    pub format: ImageFormat,

    /// Revised prompt if the model modified it
    pub revised_prompt: Option<String>,

    /// Seed used for generation
    pub seed: Option<i64>,
}

impl GeneratedImage {
    pub fn new(data: Vec<u8>, format: ImageFormat) -> Self {
        Self {
            data,
            format,
            revised_prompt: None,
            seed: None,
        }
    }
}

/// Outcome of one generate or edit call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub images: Vec<GeneratedImage>,

    /// Backend that actually produced the images
    pub backend: String,

    /// Model used for generation
    pub model: Option<String>,

    pub warnings: Vec<String>,
}

impl GenerationResult {
    pub fn new(backend: impl Into<String>, images: Vec<GeneratedImage>) -> Self {
        Self {
            images,
            backend: backend.into(),
            model: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// What a backend can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub generate: bool,
    pub edit: bool,
    pub max_width: u32,
    pub max_height: u32,
    pub models: Vec<String>,
    pub features: Vec<String>,
    /// Whether edits keep a non-square input's aspect ratio
    pub edit_preserves_aspect_ratio: bool,
}

/// Backend status information
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub configured: bool,
    pub required_credential_keys: Vec<String>,
    pub capabilities: Capabilities,
}

/// Trait for image generation backends
///
/// Implementations route every call through the shared resilience shell. The
/// default `generate`/`edit` bodies fail with `NotImplemented`.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Environment keys holding this backend's credentials
    fn required_credentials(&self) -> Vec<String>;

    /// Credentials present and plausibly well-formed
    fn is_configured(&self) -> bool;

    fn capabilities(&self) -> Capabilities;

    /// Generate images from a request
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let _ = request;
        Err(AppError::not_implemented(self.name(), Operation::Generate.to_string()))
    }

    /// Edit an image according to a prompt
    async fn edit(&self, request: &EditRequest) -> Result<GenerationResult> {
        let _ = request;
        Err(AppError::not_implemented(self.name(), Operation::Edit.to_string()))
    }

    /// Get current status
    fn status(&self) -> BackendStatus {
        BackendStatus {
            name: self.name().to_string(),
            configured: self.is_configured(),
            required_credential_keys: self.required_credentials(),
            capabilities: self.capabilities(),
        }
    }
}
