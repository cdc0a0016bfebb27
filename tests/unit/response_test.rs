//! Unit tests for response encoding, format sniffing and image storage

use imagegen_gateway::backend::traits::{GeneratedImage, ImageFormat};
use imagegen_gateway::response::file::ImageStore;
use imagegen_gateway::response::{
    base64, detect_format, image_dimensions, is_near_square, ResponseFormat,
};
use std::io::Cursor;

fn encoded(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    image::DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

#[test]
fn test_base64_encode_decode() {
    let original = b"Hello, World!";
    let decoded = base64::decode(&base64::encode(original)).unwrap();
    assert_eq!(original.as_slice(), decoded.as_slice());
}

#[test]
fn test_base64_is_valid() {
    assert!(base64::is_valid("SGVsbG8sIFdvcmxkIQ=="));
    assert!(base64::is_valid("data:image/png;base64,SGVsbG8sIFdvcmxkIQ=="));
    assert!(!base64::is_valid("not valid base64!!!"));
}

#[test]
fn test_format_from_data_url() {
    assert_eq!(
        base64::get_format_from_data_url("data:image/png;base64,abc"),
        Some(ImageFormat::Png)
    );
    assert_eq!(
        base64::get_format_from_data_url("data:image/jpg;base64,abc"),
        Some(ImageFormat::Jpeg)
    );
    assert_eq!(base64::get_format_from_data_url("data:image/tiff;base64,abc"), None);
    assert_eq!(base64::get_format_from_data_url("not a data url"), None);
}

#[test]
fn test_create_data_url() {
    let data_url = base64::create_data_url(b"test data", ImageFormat::Webp);
    assert!(data_url.starts_with("data:image/webp;base64,"));
    assert_eq!(base64::decode(&data_url).unwrap(), b"test data");
}

#[test]
fn test_response_format_parsing() {
    assert_eq!(ResponseFormat::from_str("file"), ResponseFormat::File);
    assert_eq!(ResponseFormat::from_str("PATH"), ResponseFormat::File);
    assert_eq!(ResponseFormat::from_str("b64_json"), ResponseFormat::Base64Json);
    assert_eq!(ResponseFormat::from_str("anything"), ResponseFormat::Base64Json);
}

#[test]
fn test_detect_encoded_formats() {
    assert_eq!(detect_format(&encoded(4, 4, image::ImageFormat::Png)), Some(ImageFormat::Png));
    assert_eq!(detect_format(&encoded(4, 4, image::ImageFormat::Jpeg)), Some(ImageFormat::Jpeg));
    assert_eq!(detect_format(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
    assert_eq!(detect_format(b"RIFF\0\0\0\0WAVE"), None);
    assert_eq!(detect_format(&[]), None);
}

#[test]
fn test_image_dimensions_and_squareness() {
    assert_eq!(image_dimensions(&encoded(300, 200, image::ImageFormat::Png)), Some((300, 200)));
    assert_eq!(image_dimensions(&encoded(64, 60, image::ImageFormat::Jpeg)), Some((64, 60)));

    assert!(is_near_square(64, 60));
    assert!(is_near_square(110, 100));
    assert!(!is_near_square(300, 200));
    assert!(!is_near_square(100, 0));
}

#[tokio::test]
async fn test_image_store_save_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = ImageStore::new(dir.path().join("nested/images"));

    let image = GeneratedImage::new(encoded(8, 8, image::ImageFormat::Png), ImageFormat::Png);
    let path = store.save(&image).await.unwrap();

    assert!(path.starts_with(dir.path().join("nested/images")));
    assert_eq!(path.extension().unwrap(), "png");

    assert_eq!(tokio::fs::read(&path).await.unwrap(), image.data);

    // A second save gets a distinct name
    let second = store.save(&image).await.unwrap();
    assert_ne!(path, second);
}

#[tokio::test]
async fn test_image_store_jpeg_extension() {
    let dir = tempfile::tempdir().unwrap();
    let store = ImageStore::new(dir.path());
    tokio_test::assert_ok!(store.ensure_storage_dir().await);
    // Idempotent
    tokio_test::assert_ok!(store.ensure_storage_dir().await);

    let image = GeneratedImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0], ImageFormat::Jpeg);
    let path = store.save(&image).await.unwrap();
    assert_eq!(path.extension().unwrap(), "jpg");
}
