//! Response handling - encoding helpers, format sniffing and image storage

pub mod base64;
pub mod file;

use std::io::Cursor;

use crate::backend::traits::ImageFormat;

/// How the HTTP surface returns images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Base64 encoded JSON
    Base64Json,
    /// Saved to the image store; the response carries the path
    File,
}

impl ResponseFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "file" | "path" => Self::File,
            _ => Self::Base64Json,
        }
    }
}

/// Detect image format from binary data using magic bytes
pub fn detect_format(data: &[u8]) -> Option<ImageFormat> {
    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(ImageFormat::Png);
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ImageFormat::Jpeg);
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some(ImageFormat::Webp);
    }

    None
}

/// Read width and height from an encoded image header
pub fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Whether `width:height` is within 10% of square
pub fn is_near_square(width: u32, height: u32) -> bool {
    if width == 0 || height == 0 {
        return false;
    }
    let ratio = width as f64 / height as f64;
    (0.9..=1.1).contains(&ratio)
}
