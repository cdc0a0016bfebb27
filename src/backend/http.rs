//! Shared HTTP plumbing for provider backends

use reqwest::{multipart::Part, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::backend::traits::{GeneratedImage, ImageFormat};
use crate::error::{AppError, Result};
use crate::resilience::validation::validate_payload;
use crate::response::{base64, detect_format};

/// Build the pooled client shared by all providers.
///
/// No client-wide timeout: each call is bounded by the resilience shell.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("imagegen-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Send a request and classify any failure
pub async fn send(backend: &str, request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.map_err(|e| transport_error(backend, e))?;
    check_status(backend, response).await
}

/// Map a transport-level failure to a retryable error
pub fn transport_error(backend: &str, err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::transient(backend, format!("request timed out: {}", err))
    } else if err.is_connect() {
        AppError::transient(backend, format!("connection failed: {}", err))
    } else {
        AppError::transient(backend, format!("request failed: {}", err))
    }
}

/// Turn a non-success status into the matching error class
pub async fn check_status(backend: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = truncate(&body, 300);
    debug!(backend = %backend, status = %status, body = %detail, "Provider returned an error");

    Err(classify_status(backend, status, &detail))
}

/// 429 and 5xx are transient, 401/403 mean bad credentials, other 4xx are
/// rejected input.
pub fn classify_status(backend: &str, status: StatusCode, detail: &str) -> AppError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AppError::transient(backend, format!("HTTP {}: {}", status.as_u16(), detail))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        AppError::not_configured(
            backend,
            format!("credentials rejected (HTTP {}): {}", status.as_u16(), detail),
        )
    } else {
        AppError::invalid_input(backend, format!("HTTP {}: {}", status.as_u16(), detail))
    }
}

/// Parse a JSON body; a malformed success body is treated as a provider glitch
pub async fn read_json<T: DeserializeOwned>(backend: &str, response: Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| AppError::transient(backend, format!("malformed response: {}", e)))
}

/// Decode a base64 image returned by a provider
pub fn decode_image(
    backend: &str,
    encoded: &str,
    declared: Option<ImageFormat>,
    max_bytes: usize,
) -> Result<GeneratedImage> {
    let data = base64::decode(encoded)
        .map_err(|e| AppError::transient(backend, format!("invalid base64 image: {}", e)))?;
    validate_payload(backend, "output image", data.len(), max_bytes)?;
    let format = detect_format(&data)
        .or(declared)
        .unwrap_or(ImageFormat::Png);
    Ok(GeneratedImage::new(data, format))
}

/// Fetch an image a provider returned by URL
pub async fn download_image(
    client: &Client,
    backend: &str,
    url: &str,
    max_bytes: usize,
) -> Result<GeneratedImage> {
    let response = send(backend, client.get(url)).await?;

    if let Some(length) = response.content_length() {
        validate_payload(backend, "output image", length as usize, max_bytes)?;
    }

    let declared = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("image/"))
        .and_then(ImageFormat::parse);

    let data = response
        .bytes()
        .await
        .map_err(|e| transport_error(backend, e))?
        .to_vec();
    validate_payload(backend, "output image", data.len(), max_bytes)?;

    let format = detect_format(&data)
        .or(declared)
        .unwrap_or(ImageFormat::Png);
    debug!(backend = %backend, size = data.len(), format = %format, "Downloaded image");
    Ok(GeneratedImage::new(data, format))
}

/// Multipart file part for an input image
pub fn image_part(backend: &str, name: &str, data: &[u8]) -> Result<Part> {
    let format = detect_format(data).unwrap_or(ImageFormat::Png);
    Part::bytes(data.to_vec())
        .file_name(format!("{}.{}", name, format.extension()))
        .mime_str(format.mime_type())
        .map_err(|e| AppError::Internal(format!("[{}] invalid multipart mime: {}", backend, e)))
}

/// Pick the provider ratio label closest to `width:height`
pub fn closest_aspect_ratio<'a>(width: u32, height: u32, options: &[(&'a str, u32, u32)]) -> &'a str {
    let target = width.max(1) as f64 / height.max(1) as f64;
    options
        .iter()
        .min_by(|a, b| {
            let da = (a.1 as f64 / a.2 as f64 - target).abs();
            let db = (b.1 as f64 / b.2 as f64 - target).abs();
            da.total_cmp(&db)
        })
        .map(|(label, _, _)| *label)
        .unwrap_or("1:1")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    }
}
