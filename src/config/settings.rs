//! Application settings and configuration management

use crate::backend::registry::KNOWN_BACKENDS;
use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    /// Per-provider overrides keyed by backend name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Backend name or "auto", used when a request names none
    #[serde(default)]
    pub default_backend: Option<String>,
    #[serde(default)]
    pub disable_fallback: bool,
    /// Accept `test-` prefixed credentials
    #[serde(default)]
    pub test_mode: bool,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub base_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> String {
    "./generated_images".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Limits and timings for the per-backend resilience shell
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_max_requests")]
    pub rate_limit_max_requests: u32,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_slow_timeout")]
    pub slow_timeout_secs: u64,
    #[serde(default = "default_max_prompt_length")]
    pub max_prompt_length: usize,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_secs: default_window_secs(),
            rate_limit_max_requests: default_max_requests(),
            cache_ttl_secs: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
            max_retries: default_max_retries(),
            retry_initial_delay_ms: default_initial_delay(),
            retry_max_delay_ms: default_max_delay(),
            default_timeout_secs: default_timeout(),
            slow_timeout_secs: default_slow_timeout(),
            max_prompt_length: default_max_prompt_length(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl ResilienceConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn slow_timeout(&self) -> Duration {
        Duration::from_secs(self.slow_timeout_secs)
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> u32 {
    10
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    10000
}

fn default_timeout() -> u64 {
    30
}

fn default_slow_timeout() -> u64 {
    120
}

fn default_max_prompt_length() -> usize {
    4000
}

fn default_max_payload_bytes() -> usize {
    10 * 1024 * 1024
}

/// Per-provider overrides
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Alternate API base URL (proxies, regional endpoints, mock servers)
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let disable_fallback = std::env::var("DISABLE_FALLBACK")
            .ok()
            .map(|v| v.trim().eq_ignore_ascii_case("true"));
        let default_backend = std::env::var("DEFAULT_BACKEND")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("auth.enabled", false)?
            .set_default("disable_fallback", false)?
            .set_default("test_mode", false)?
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with IMAGEGEN_)
            .add_source(
                Environment::with_prefix("IMAGEGEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            // The unprefixed keys win over file and prefixed values
            .set_override_option("default_backend", default_backend)?
            .set_override_option("disable_fallback", disable_fallback)?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(config_error("Server port cannot be 0"));
        }

        let r = &self.resilience;
        if r.rate_limit_window_secs == 0 || r.rate_limit_max_requests == 0 {
            return Err(config_error("Rate limit window and ceiling must be non-zero"));
        }
        if r.max_retries == 0 {
            return Err(config_error("Retry budget must allow at least one attempt"));
        }
        if r.max_prompt_length == 0 || r.max_payload_bytes == 0 {
            return Err(config_error("Prompt and payload ceilings must be non-zero"));
        }

        if let Some(name) = &self.default_backend {
            let name = name.to_lowercase();
            if name != "auto" && !KNOWN_BACKENDS.contains(&name.as_str()) {
                return Err(config_error(format!(
                    "DEFAULT_BACKEND '{}' is not a known backend. Expected 'auto' or one of: {}",
                    name,
                    KNOWN_BACKENDS.join(", ")
                )));
            }
        }

        for name in self.providers.keys() {
            if !KNOWN_BACKENDS.contains(&name.to_lowercase().as_str()) {
                return Err(config_error(format!(
                    "Provider override '{}' does not match a known backend",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Overrides for a single provider, if any were configured
    pub fn provider(&self, name: &str) -> ProviderConfig {
        self.providers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, cfg)| cfg.clone())
            .unwrap_or_default()
    }
}

fn config_error(message: impl Into<String>) -> AppError {
    AppError::Config(config::ConfigError::Message(message.into()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            resilience: ResilienceConfig::default(),
            providers: HashMap::new(),
            default_backend: None,
            disable_fallback: false,
            test_mode: false,
        }
    }
}
