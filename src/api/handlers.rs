//! HTTP handlers for the gateway endpoints

use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::models::{
    ConfiguredBackendsResponse, EditImageRequest, GenerateImageRequest, HealthResponse, ImageData,
    ImageResponse,
};
use crate::backend::traits::{BackendStatus, GenerationResult};
use crate::error::Result;
use crate::response::ResponseFormat;
use crate::AppState;

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        configured_backends: state.dispatcher.configured_backends().len(),
    })
}

/// GET /v1/backends
pub async fn list_backends(State(state): State<Arc<AppState>>) -> Json<Vec<BackendStatus>> {
    Json(state.dispatcher.list_backends())
}

/// GET /v1/backends/configured
pub async fn configured_backends(State(state): State<Arc<AppState>>) -> Json<ConfiguredBackendsResponse> {
    Json(ConfiguredBackendsResponse {
        generate: state.dispatcher.configured_backends(),
        edit: state.dispatcher.configured_edit_backends(),
    })
}

/// POST /v1/images/generations
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateImageRequest>,
) -> Result<Json<ImageResponse>> {
    debug!(
        prompt_len = body.prompt.len(),
        backend = ?body.backend,
        "Generation request received"
    );

    let request = body.to_generation()?;
    let result = state.dispatcher.generate(&request).await?;

    info!(
        backend = %result.backend,
        images = result.images.len(),
        warnings = result.warnings.len(),
        "Images generated"
    );
    render(&state, &result, body.response_format()).await
}

/// POST /v1/images/edits
pub async fn edit_image(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EditImageRequest>,
) -> Result<Json<ImageResponse>> {
    debug!(
        prompt_len = body.params.prompt.len(),
        backend = ?body.params.backend,
        masked = body.mask.is_some() || body.mask_path.is_some(),
        "Edit request received"
    );

    let request = body.to_edit()?;
    let result = state.dispatcher.edit(&request).await?;

    info!(backend = %result.backend, images = result.images.len(), "Image edited");
    render(&state, &result, body.params.response_format()).await
}

async fn render(
    state: &AppState,
    result: &GenerationResult,
    format: ResponseFormat,
) -> Result<Json<ImageResponse>> {
    let mut data = Vec::with_capacity(result.images.len());
    for image in &result.images {
        data.push(match format {
            ResponseFormat::Base64Json => ImageData::inline(image),
            ResponseFormat::File => {
                let path = state.image_store.save(image).await?;
                ImageData::file(image, path.display().to_string())
            }
        });
    }
    Ok(Json(ImageResponse::new(result, data)))
}
