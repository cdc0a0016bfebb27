//! Base64 encoding and decoding utilities

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::backend::traits::ImageFormat;

/// Encode binary data to base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Strip a `data:...;base64,` prefix if present
fn payload(encoded: &str) -> &str {
    match encoded.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    }
}

/// Decode base64 text or a data URL to binary data
pub fn decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    // Providers and clients sometimes wrap long payloads
    let cleaned: String = payload(encoded)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned)
}

/// Check if a string is valid base64
pub fn is_valid(data: &str) -> bool {
    decode(data).is_ok()
}

/// Get the image format from a data URL prefix
pub fn get_format_from_data_url(data_url: &str) -> Option<ImageFormat> {
    let rest = data_url.strip_prefix("data:image/")?;
    let end = rest.find(';')?;
    ImageFormat::parse(&rest[..end])
}

/// Create a data URL from binary image data
pub fn create_data_url(data: &[u8], format: ImageFormat) -> String {
    format!("data:{};base64,{}", format.mime_type(), encode(data))
}
