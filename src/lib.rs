//! Image generation gateway
//!
//! Dispatches image generation and editing requests across several hosted
//! providers. Each provider call runs inside a shared resilience shell
//! (validation, rate limiting, caching, timeouts, retry), and the dispatcher
//! picks a backend from the prompt when asked to and falls back once when a
//! backend fails transiently.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod resilience;
pub mod response;

pub use error::{AppError, Result};

use std::sync::Arc;

use backend::credentials::Credentials;
use backend::providers::ProviderContext;
use backend::registry::BackendRegistry;
use gateway::{DispatchConfig, Dispatcher};
use response::file::ImageStore;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub dispatcher: Arc<Dispatcher>,
    pub image_store: Arc<ImageStore>,
}

impl AppState {
    /// Wire the built-in providers, registry and dispatcher from settings
    pub fn from_settings(settings: config::Settings, credentials: Credentials) -> Result<Self> {
        let ctx = ProviderContext::new(&settings, credentials)?;
        let registry = Arc::new(BackendRegistry::with_providers(ctx));
        let dispatcher = Dispatcher::new(registry, DispatchConfig::from_settings(&settings));
        Ok(Self::new(settings, dispatcher))
    }

    /// State around an already built dispatcher
    pub fn new(settings: config::Settings, dispatcher: Dispatcher) -> Self {
        let image_store = ImageStore::new(&settings.storage.base_path);
        Self {
            settings: Arc::new(settings),
            dispatcher: Arc::new(dispatcher),
            image_store: Arc::new(image_store),
        }
    }
}
