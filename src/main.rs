//! Main entry point for the image generation gateway

use imagegen_gateway::{
    api,
    backend::{credentials::Credentials, registry::CREDENTIAL_KEYS},
    config::Settings,
    AppState,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    if settings.logging.format.eq_ignore_ascii_case("pretty") {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }

    info!(
        host = %settings.server.host,
        port = settings.server.port,
        default_backend = ?settings.default_backend,
        fallback = !settings.disable_fallback,
        "Starting image generation gateway"
    );

    let credentials = Credentials::from_env(CREDENTIAL_KEYS, settings.test_mode);
    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    let state = Arc::new(AppState::from_settings(settings, credentials)?);
    state.image_store.ensure_storage_dir().await?;

    let configured = state.dispatcher.configured_backends();
    if configured.is_empty() {
        warn!(
            keys = %CREDENTIAL_KEYS.join(", "),
            "No backend has valid credentials; every request will fail until one is set"
        );
    } else {
        info!(backends = ?configured, "Configured backends");
    }

    let app = api::routes::create_router(state);

    info!(%addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
