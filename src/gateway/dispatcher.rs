//! Dispatch and fallback for generate/edit requests
//!
//! Resolves a request to one backend (explicit name, "auto" or the configured
//! default), enforces capability limits before calling it, and on a retryable
//! failure makes exactly one sequential attempt on a different backend.

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::registry::BackendRegistry;
use crate::backend::traits::{
    BackendStatus, EditRequest, GenerationRequest, GenerationResult, ImageBackend, ImageReference,
    Operation,
};
use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::gateway::selection::{fallback_order, SelectionEngine};
use crate::response::{image_dimensions, is_near_square};

/// Name that requests automatic selection
pub const AUTO: &str = "auto";

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Backend name or "auto" used when a request names none
    pub default_backend: Option<String>,
    /// Whether a retryable failure may move to a second backend
    pub fallback_enabled: bool,
    /// Ceiling for input images read while probing aspect ratio
    pub max_payload_bytes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_backend: None,
            fallback_enabled: true,
            max_payload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl DispatchConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_backend: settings.default_backend.clone(),
            fallback_enabled: !settings.disable_fallback,
            max_payload_bytes: settings.resilience.max_payload_bytes,
        }
    }
}

/// Backend picked for a request plus any notes for the caller
struct Resolved {
    backend: Arc<dyn ImageBackend>,
    warnings: Vec<String>,
}

/// Request dispatcher with selection and one-step fallback
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    selection: SelectionEngine,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<BackendRegistry>, config: DispatchConfig) -> Self {
        Self::with_selection(registry, SelectionEngine::default(), config)
    }

    pub fn with_selection(
        registry: Arc<BackendRegistry>,
        selection: SelectionEngine,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            selection,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn list_backends(&self) -> Vec<BackendStatus> {
        self.registry.statuses()
    }

    pub fn configured_backends(&self) -> Vec<String> {
        self.registry.configured()
    }

    pub fn configured_edit_backends(&self) -> Vec<String> {
        self.registry.configured_for_edit()
    }

    /// Generate images, falling back once on a retryable failure
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let available = self.registry.configured();
        let resolved = self.resolve(request.backend.as_deref(), &request.prompt, &available)?;

        self.run(Operation::Generate, request, resolved, &available, move |backend| async move {
            backend.generate(request).await
        })
        .await
    }

    /// Edit an image, falling back once on a retryable failure.
    ///
    /// Whenever the backend is chosen by selection (auto mode, or a
    /// substitute for an unconfigured explicit name) a non-square input
    /// excludes backends that cannot keep its aspect ratio.
    pub async fn edit(&self, request: &EditRequest) -> Result<GenerationResult> {
        let mut available = self.registry.configured_for_edit();
        let mut request = request.clone();

        if self.selects(request.generation.backend.as_deref()) {
            let bytes = request
                .image
                .load(AUTO, "image", self.config.max_payload_bytes)
                .await?;
            if let Some((width, height)) = image_dimensions(&bytes) {
                if !is_near_square(width, height) {
                    available.retain(|name| {
                        self.registry
                            .get(name)
                            .is_some_and(|b| b.capabilities().edit_preserves_aspect_ratio)
                    });
                    info!(
                        width,
                        height,
                        candidates = ?available,
                        "Non-square edit input; excluding backends that do not keep aspect ratio"
                    );
                }
            }
            // Backends read the already-loaded bytes instead of the source again
            request.image = ImageReference::Bytes(bytes);
        }

        let resolved = self.resolve(
            request.generation.backend.as_deref(),
            request.prompt(),
            &available,
        )?;

        let request = &request;
        self.run(
            Operation::Edit,
            &request.generation,
            resolved,
            &available,
            move |backend| async move { backend.edit(request).await },
        )
        .await
    }

    fn requested_name<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
        requested
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or(self.config.default_backend.as_deref())
    }

    fn is_auto(&self, requested: Option<&str>) -> bool {
        self.requested_name(requested)
            .map_or(true, |name| name.eq_ignore_ascii_case(AUTO))
    }

    /// Whether `resolve` will pick the backend through selection
    fn selects(&self, requested: Option<&str>) -> bool {
        if self.is_auto(requested) {
            return true;
        }
        self.config.fallback_enabled
            && self
                .requested_name(requested)
                .and_then(|name| self.registry.get(name))
                .is_some_and(|backend| !backend.is_configured())
    }

    fn resolve(&self, requested: Option<&str>, prompt: &str, available: &[String]) -> Result<Resolved> {
        let explicit = self
            .requested_name(requested)
            .filter(|name| !name.eq_ignore_ascii_case(AUTO));

        let Some(name) = explicit else {
            let chosen = self.select(prompt, available)?;
            return Ok(Resolved {
                backend: chosen,
                warnings: Vec::new(),
            });
        };

        let backend = self
            .registry
            .get(name)
            .ok_or_else(|| AppError::BackendNotFound(name.to_string()))?;
        if backend.is_configured() {
            return Ok(Resolved {
                backend,
                warnings: Vec::new(),
            });
        }

        if !self.config.fallback_enabled {
            return Err(AppError::not_configured(
                backend.name(),
                format!("set {}", backend.required_credentials().join(", ")),
            ));
        }

        let substitute = self.select(prompt, available)?;
        warn!(
            requested = %backend.name(),
            backend = %substitute.name(),
            "Requested backend is not configured; substituting"
        );
        let warnings = vec![format!(
            "{} is not configured; used {} instead",
            backend.name(),
            substitute.name()
        )];
        Ok(Resolved {
            backend: substitute,
            warnings,
        })
    }

    fn select(&self, prompt: &str, available: &[String]) -> Result<Arc<dyn ImageBackend>> {
        let name = self
            .selection
            .select_backend(prompt, available, None)
            .ok_or_else(|| AppError::NoBackendsAvailable("no backend has valid credentials".to_string()))?;
        self.registry
            .get(&name)
            .ok_or(AppError::BackendNotFound(name))
    }

    async fn run<F, Fut>(
        &self,
        operation: Operation,
        params: &GenerationRequest,
        resolved: Resolved,
        available: &[String],
        invoke: F,
    ) -> Result<GenerationResult>
    where
        F: Fn(Arc<dyn ImageBackend>) -> Fut,
        Fut: Future<Output = Result<GenerationResult>>,
    {
        let Resolved {
            backend: primary,
            mut warnings,
        } = resolved;

        check_capabilities(primary.as_ref(), operation, params)?;
        info!(backend = %primary.name(), operation = %operation, "Dispatching request");

        let error = match invoke(primary.clone()).await {
            Ok(result) => return Ok(finish(result, primary.name(), warnings)),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        let mut tried = vec![primary.name().to_string()];
        if !self.config.fallback_enabled {
            warn!(backend = %primary.name(), error = %error, "Backend failed; fallback is disabled");
            return Err(error.with_tried(tried));
        }

        let fallback = fallback_order(available, primary.name())
            .into_iter()
            .filter_map(|name| self.registry.get(&name))
            .find(|candidate| check_capabilities(candidate.as_ref(), operation, params).is_ok());

        let Some(fallback) = fallback else {
            warn!(backend = %primary.name(), error = %error, "Backend failed; no fallback available");
            return Err(error.with_tried(tried));
        };

        warn!(
            backend = %primary.name(),
            fallback = %fallback.name(),
            error = %error,
            "Backend failed; falling back"
        );
        tried.push(fallback.name().to_string());

        match invoke(fallback.clone()).await {
            Ok(result) => {
                warnings.push(format!(
                    "{} failed ({}); fell back to {}",
                    primary.name(),
                    error,
                    fallback.name()
                ));
                Ok(finish(result, fallback.name(), warnings))
            }
            Err(err) => Err(err.with_tried(tried)),
        }
    }
}

/// Reject a request the backend cannot serve, before any call is made
fn check_capabilities(backend: &dyn ImageBackend, operation: Operation, params: &GenerationRequest) -> Result<()> {
    let caps = backend.capabilities();
    let supported = match operation {
        Operation::Generate => caps.generate,
        Operation::Edit => caps.edit,
    };
    if !supported {
        return Err(AppError::capability_exceeded(
            backend.name(),
            format!("{} is not supported", operation),
        ));
    }

    if let Some(width) = params.width.filter(|w| *w > caps.max_width) {
        return Err(AppError::capability_exceeded(
            backend.name(),
            format!("width {} exceeds the maximum of {}", width, caps.max_width),
        ));
    }
    if let Some(height) = params.height.filter(|h| *h > caps.max_height) {
        return Err(AppError::capability_exceeded(
            backend.name(),
            format!("height {} exceeds the maximum of {}", height, caps.max_height),
        ));
    }
    Ok(())
}

fn finish(mut result: GenerationResult, backend: &str, mut warnings: Vec<String>) -> GenerationResult {
    result.backend = backend.to_string();
    warnings.append(&mut result.warnings);
    result.warnings = warnings;
    result
}
