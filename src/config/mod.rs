//! Configuration module - settings loading and validation

pub mod settings;

pub use settings::{
    AuthConfig, LoggingConfig, ProviderConfig, ResilienceConfig, ServerConfig, Settings,
    StorageConfig,
};
