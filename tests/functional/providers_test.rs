//! Provider adapters against mock HTTP servers

use imagegen_gateway::backend::credentials::Credentials;
use imagegen_gateway::backend::providers::{
    BflBackend, GeminiBackend, IdeogramBackend, OpenAiBackend, ProviderContext, ReplicateBackend,
    StabilityBackend,
};
use imagegen_gateway::backend::traits::{
    EditRequest, GenerationRequest, ImageBackend, ImageFormat, ImageReference,
};
use imagegen_gateway::config::{ProviderConfig, ResilienceConfig};
use imagegen_gateway::resilience::ResilienceContext;
use imagegen_gateway::response::base64;
use imagegen_gateway::AppError;
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use wiremock::matchers::{bearer_token, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NAMES: &[&str] = &["openai", "stability", "bfl", "ideogram", "gemini", "replicate"];

fn fast_retries() -> ResilienceConfig {
    ResilienceConfig {
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..ResilienceConfig::default()
    }
}

fn credentials() -> Credentials {
    Credentials::from_pairs(
        [
            ("OPENAI_API_KEY", "sk-live-openai-0123456789"),
            ("STABILITY_API_KEY", "sk-live-stability-0123456789"),
            ("BFL_API_KEY", "bfl-live-0123456789"),
            ("IDEOGRAM_API_KEY", "ideogram-live-0123456789"),
            ("GEMINI_API_KEY", "AIza-live-0123456789"),
            ("REPLICATE_API_TOKEN", "r8_live_0123456789"),
        ],
        false,
    )
}

fn context_with(server: &MockServer, config: ResilienceConfig, credentials: Credentials) -> ProviderContext {
    let shell = Arc::new(ResilienceContext::new(config));
    let mut ctx = ProviderContext::with_shell(shell, credentials).unwrap();
    for name in NAMES {
        ctx = ctx.with_override(
            name,
            ProviderConfig {
                base_url: Some(server.uri()),
                timeout_secs: Some(10),
            },
        );
    }
    ctx
}

fn context(server: &MockServer) -> ProviderContext {
    context_with(server, fast_retries(), credentials())
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    image::DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

async fn mount_image(server: &MockServer, route: &str, data: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(data),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_openai_generate_and_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(bearer_token("sk-live-openai-0123456789"))
        .and(body_partial_json(json!({"model": "gpt-image-1", "size": "1536x1024"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"b64_json": base64::encode(&png(8, 8)), "revised_prompt": "a red kite, detailed"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(&context(&server));
    let request = GenerationRequest::new("a red kite").with_size(1536, 1024);

    let first = backend.generate(&request).await.unwrap();
    assert_eq!(first.backend, "openai");
    assert_eq!(first.model.as_deref(), Some("gpt-image-1"));
    assert_eq!(first.images[0].format, ImageFormat::Png);
    assert_eq!(first.images[0].revised_prompt.as_deref(), Some("a red kite, detailed"));
    assert!(first.warnings.is_empty());

    let second = backend.generate(&request).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_openai_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid size"))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(&context(&server));
    let err = backend.generate(&GenerationRequest::new("a kite")).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput { ref backend, .. } if backend == "openai"));
    assert!(err.to_string().contains("invalid size"));
}

#[tokio::test]
async fn test_openai_server_error_uses_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(&context(&server));
    let err = backend.generate(&GenerationRequest::new("a kite")).await.unwrap_err();
    assert!(matches!(err, AppError::Transient { .. }));
}

#[tokio::test]
async fn test_openai_rejected_credentials_are_not_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(&context(&server));
    let err = backend.generate(&GenerationRequest::new("a kite")).await.unwrap_err();
    assert!(matches!(err, AppError::NotConfigured { .. }));
}

#[tokio::test]
async fn test_openai_edit_sends_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/edits"))
        .and(bearer_token("sk-live-openai-0123456789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"b64_json": base64::encode(&png(8, 8))}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::new(&context(&server));
    let request = EditRequest::new("add a hat", ImageReference::Inline(base64::encode(&png(16, 16))))
        .with_mask(ImageReference::Bytes(Arc::new(png(16, 16))));
    let result = backend.edit(&request).await.unwrap();
    assert_eq!(result.images.len(), 1);
}

#[tokio::test]
async fn test_missing_credentials_fail_before_any_request() {
    let server = MockServer::start().await;
    let ctx = context_with(&server, fast_retries(), Credentials::from_pairs([("OPENAI_API_KEY", "demo")], false));

    let backend = OpenAiBackend::new(&ctx);
    assert!(!backend.is_configured());
    let err = backend.generate(&GenerationRequest::new("a kite")).await.unwrap_err();
    assert!(matches!(err, AppError::NotConfigured { .. }));
    assert!(err.to_string().contains("OPENAI_API_KEY"));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_oversized_output_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"b64_json": base64::encode(&vec![0u8; 4096])}]
        })))
        .mount(&server)
        .await;

    let config = ResilienceConfig {
        max_payload_bytes: 1024,
        ..fast_retries()
    };
    let backend = OpenAiBackend::new(&context_with(&server, config, credentials()));
    let err = backend.generate(&GenerationRequest::new("a kite")).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_stability_generate_maps_aspect_ratio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2beta/stable-image/generate/core"))
        .and(bearer_token("sk-live-stability-0123456789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "image": base64::encode(&png(8, 8)),
            "finish_reason": "SUCCESS",
            "seed": 42
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = StabilityBackend::new(&context(&server));
    let result = backend
        .generate(&GenerationRequest::new("a canyon").with_size(1000, 700))
        .await
        .unwrap();
    assert_eq!(result.images[0].seed, Some(42));
    assert_eq!(result.warnings, vec!["Stability sizes by aspect ratio; 1000x700 was mapped to 3:2"]);
}

#[tokio::test]
async fn test_stability_content_filter_is_invalid_input() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2beta/stable-image/generate/core"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "image": null,
            "finish_reason": "CONTENT_FILTERED"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = StabilityBackend::new(&context(&server));
    let err = backend.generate(&GenerationRequest::new("a canyon")).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_bfl_job_is_polled_and_downloaded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/flux-pro-1.1"))
        .and(header("x-key", "bfl-live-0123456789"))
        .and(body_partial_json(json!({"width": 1024, "height": 576})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "job-1",
            "polling_url": format!("{}/v1/get_result?id=job-1", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/get_result"))
        .and(query_param("id", "job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "Ready",
            "result": {"sample": format!("{}/samples/job-1.png", server.uri())}
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_image(&server, "/samples/job-1.png", png(8, 8)).await;

    let backend = BflBackend::new(&context(&server));
    let result = backend
        .generate(&GenerationRequest::new("a misty forest").with_size(1024, 576))
        .await
        .unwrap();
    assert_eq!(result.backend, "bfl");
    assert_eq!(result.model.as_deref(), Some("flux-pro-1.1"));
    assert_eq!(result.images[0].format, ImageFormat::Png);
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn test_bfl_moderation_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/flux-pro-1.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "job-2"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/get_result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Request Moderated"})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = BflBackend::new(&context(&server));
    let err = backend.generate(&GenerationRequest::new("a forest")).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_ideogram_generate_downloads_urls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/ideogram-v3/generate"))
        .and(header("Api-Key", "ideogram-live-0123456789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"url": format!("{}/ephemeral/a.png", server.uri()), "prompt": "GRAND OPENING sign", "seed": 7, "is_image_safe": true},
                {"url": null, "is_image_safe": false}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_image(&server, "/ephemeral/a.png", png(8, 8)).await;

    let backend = IdeogramBackend::new(&context(&server));
    let result = backend
        .generate(&GenerationRequest::new("a sign that says GRAND OPENING"))
        .await
        .unwrap();
    assert_eq!(result.images.len(), 1);
    assert_eq!(result.images[0].seed, Some(7));
    assert_eq!(result.warnings, vec!["1 output(s) were withheld by the safety filter"]);
}

#[tokio::test]
async fn test_gemini_inline_image_and_block() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash-image:generateContent"))
        .and(header("x-goog-api-key", "AIza-live-0123456789"))
        .and(body_partial_json(json!({"contents": [{"parts": [{"text": "a paper crane"}]}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here is your crane."},
                    {"inlineData": {"mimeType": "image/png", "data": base64::encode(&png(8, 8))}}
                ]},
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash-image:generateContent"))
        .and(body_partial_json(json!({"contents": [{"parts": [{"text": "something forbidden"}]}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = GeminiBackend::new(&context(&server));
    let result = backend.generate(&GenerationRequest::new("a paper crane")).await.unwrap();
    assert_eq!(result.images.len(), 1);

    let err = backend
        .generate(&GenerationRequest::new("something forbidden"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput { .. }));
    assert!(err.to_string().contains("SAFETY"));
}

#[tokio::test]
async fn test_gemini_text_only_reply_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash-image:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "I can't draw that person."}]},
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = GeminiBackend::new(&context(&server));
    let err = backend
        .generate(&GenerationRequest::new("a portrait of a celebrity"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput { .. }));
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("I can't draw that person."));
}

#[tokio::test]
async fn test_replicate_prediction_and_unsupported_edit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/models/black-forest-labs/flux-schnell/predictions"))
        .and(bearer_token("r8_live_0123456789"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "pred-1",
            "status": "succeeded",
            "output": [format!("{}/delivery/out-0.png", server.uri())]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_image(&server, "/delivery/out-0.png", png(8, 8)).await;

    let backend = ReplicateBackend::new(&context(&server));
    let result = backend.generate(&GenerationRequest::new("a quick sketch of a fox")).await.unwrap();
    assert_eq!(result.backend, "replicate");
    assert_eq!(result.images.len(), 1);

    let edit = EditRequest::new("add snow", ImageReference::Bytes(Arc::new(png(8, 8))));
    let err = backend.edit(&edit).await.unwrap_err();
    assert!(matches!(err, AppError::NotImplemented { ref operation, .. } if operation == "edit"));
}
