//! Concrete provider backends
//!
//! Each provider is a thin adapter: it shapes the provider's wire format and
//! hands the network work to the shared resilience shell.

pub mod bfl;
pub mod gemini;
pub mod ideogram;
pub mod openai;
pub mod replicate;
pub mod stability;

use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::credentials::Credentials;
use crate::backend::http;
use crate::backend::registry::KNOWN_BACKENDS;
use crate::config::{ProviderConfig, Settings};
use crate::error::Result;
use crate::resilience::ResilienceContext;

pub use bfl::BflBackend;
pub use gemini::GeminiBackend;
pub use ideogram::IdeogramBackend;
pub use openai::OpenAiBackend;
pub use replicate::ReplicateBackend;
pub use stability::StabilityBackend;

/// Everything a provider needs at construction time
#[derive(Clone)]
pub struct ProviderContext {
    pub shell: Arc<ResilienceContext>,
    pub credentials: Arc<Credentials>,
    pub client: Client,
    overrides: HashMap<String, ProviderConfig>,
}

impl ProviderContext {
    pub fn new(settings: &Settings, credentials: Credentials) -> Result<Self> {
        let shell = Arc::new(ResilienceContext::new(settings.resilience.clone()));
        let context = Self::with_shell(shell, credentials)?;
        Ok(KNOWN_BACKENDS
            .iter()
            .fold(context, |ctx, name| ctx.with_override(name, settings.provider(name))))
    }

    pub fn with_shell(shell: Arc<ResilienceContext>, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            shell,
            credentials: Arc::new(credentials),
            client: http::build_client()?,
            overrides: HashMap::new(),
        })
    }

    /// Override one provider's base URL or timeout
    pub fn with_override(mut self, name: &str, config: ProviderConfig) -> Self {
        self.overrides.insert(name.to_lowercase(), config);
        self
    }

    pub fn base_url(&self, name: &str, default: &str) -> String {
        self.overrides
            .get(name)
            .and_then(|cfg| cfg.base_url.clone())
            .unwrap_or_else(|| default.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Per-attempt timeout; `slow` selects the longer default for job-based providers
    pub fn timeout(&self, name: &str, slow: bool) -> Duration {
        if let Some(secs) = self.overrides.get(name).and_then(|cfg| cfg.timeout_secs) {
            return Duration::from_secs(secs);
        }
        let config = self.shell.config();
        if slow {
            config.slow_timeout()
        } else {
            config.default_timeout()
        }
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.shell.config().max_payload_bytes
    }
}
