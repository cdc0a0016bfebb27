//! Input checks applied before any backend work

use crate::error::{AppError, Result};

/// Reject empty, whitespace-only or over-long prompts.
pub fn validate_prompt(backend: &str, prompt: &str, max_length: usize) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(AppError::invalid_input(backend, "prompt must not be empty"));
    }

    let length = prompt.chars().count();
    if length > max_length {
        return Err(AppError::invalid_input(
            backend,
            format!(
                "prompt is {} characters, the maximum is {}",
                length, max_length
            ),
        ));
    }

    Ok(())
}

/// Reject image payloads above the size ceiling.
///
/// `label` names the payload in the error ("image", "mask", "output image 2").
pub fn validate_payload(backend: &str, label: &str, size: usize, max_bytes: usize) -> Result<()> {
    if size > max_bytes {
        return Err(AppError::invalid_input(
            backend,
            format!(
                "{} is {:.1} MiB, the maximum is {:.1} MiB",
                label,
                size as f64 / (1024.0 * 1024.0),
                max_bytes as f64 / (1024.0 * 1024.0)
            ),
        ));
    }
    Ok(())
}
