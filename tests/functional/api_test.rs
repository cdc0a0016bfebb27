//! Functional tests for the HTTP surface

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, Request, StatusCode},
    Router,
};
use imagegen_gateway::api::routes::create_router;
use imagegen_gateway::backend::registry::BackendRegistry;
use imagegen_gateway::backend::traits::{
    Capabilities, EditRequest, GeneratedImage, GenerationRequest, GenerationResult, ImageBackend,
    ImageFormat,
};
use imagegen_gateway::config::Settings;
use imagegen_gateway::gateway::{DispatchConfig, Dispatcher};
use imagegen_gateway::response::base64;
use imagegen_gateway::{AppError, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct Canned {
    name: &'static str,
    rate_limited: bool,
}

#[async_trait]
impl ImageBackend for Canned {
    fn name(&self) -> &str {
        self.name
    }

    fn required_credentials(&self) -> Vec<String> {
        vec!["CANNED_API_KEY".to_string()]
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            generate: true,
            edit: false,
            max_width: 1024,
            max_height: 1024,
            models: vec!["canned-1".to_string()],
            features: vec![],
            edit_preserves_aspect_ratio: true,
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> imagegen_gateway::Result<GenerationResult> {
        if self.rate_limited {
            return Err(AppError::RateLimited {
                backend: self.name.to_string(),
                retry_after: Duration::from_secs(42),
            });
        }
        let mut image = GeneratedImage::new(b"\x89PNG\r\n\x1a\nfake".to_vec(), ImageFormat::Png);
        image.seed = request.seed;
        Ok(GenerationResult::new(self.name, vec![image]).with_model("canned-1"))
    }

    async fn edit(&self, _request: &EditRequest) -> imagegen_gateway::Result<GenerationResult> {
        Err(AppError::not_implemented(self.name, "edit"))
    }
}

fn app_with(settings: Settings, backend: Canned, config: DispatchConfig) -> Router {
    let registry = Arc::new(BackendRegistry::new());
    registry.register_instance(Arc::new(backend));
    let dispatcher = Dispatcher::new(registry, config);
    create_router(Arc::new(AppState::new(settings, dispatcher)))
}

fn app(settings: Settings) -> Router {
    app_with(
        settings,
        Canned {
            name: "openai",
            rate_limited: false,
        },
        DispatchConfig::default(),
    )
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app(Settings::default()).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["configured_backends"], 1);
}

#[tokio::test]
async fn test_backend_listing() {
    let app = app(Settings::default());

    let body = json_body(app.clone().oneshot(get("/v1/backends")).await.unwrap()).await;
    assert_eq!(body[0]["name"], "openai");
    assert_eq!(body[0]["configured"], true);
    assert_eq!(body[0]["required_credential_keys"], json!(["CANNED_API_KEY"]));
    assert_eq!(body[0]["capabilities"]["max_width"], 1024);

    let body = json_body(app.oneshot(get("/v1/backends/configured")).await.unwrap()).await;
    assert_eq!(body, json!({"generate": ["openai"], "edit": []}));
}

#[tokio::test]
async fn test_generate_returns_base64() {
    let response = app(Settings::default())
        .oneshot(post_json(
            "/v1/images/generations",
            json!({"prompt": "a paper boat", "size": "512x512", "seed": 9}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["backend"], "openai");
    assert_eq!(body["model"], "canned-1");
    assert_eq!(body["data"][0]["format"], "png");
    assert_eq!(body["data"][0]["seed"], 9);
    let decoded = base64::decode(body["data"][0]["b64_json"].as_str().unwrap()).unwrap();
    assert!(decoded.starts_with(b"\x89PNG"));
}

#[tokio::test]
async fn test_generate_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.storage.base_path = dir.path().join("out").display().to_string();

    let response = app(settings)
        .oneshot(post_json(
            "/v1/images/generations",
            json!({"prompt": "a paper boat", "response_format": "file"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert!(body["data"][0].get("b64_json").is_none());
    let path = body["data"][0]["path"].as_str().unwrap();
    assert!(path.ends_with(".png"));
    assert!(std::path::Path::new(path).exists());
}

#[tokio::test]
async fn test_error_mapping() {
    let app = app(Settings::default());

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/images/generations",
            json!({"prompt": "a boat", "output_format": "tiff"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "invalid_input");

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/images/generations",
            json!({"prompt": "a boat", "width": 4096, "height": 4096}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "capability_exceeded");
    assert_eq!(body["error"]["backend"], "openai");

    let response = app
        .oneshot(post_json(
            "/v1/images/generations",
            json!({"prompt": "a boat", "backend": "nonexistent"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limited_response_carries_retry_after() {
    let app = app_with(
        Settings::default(),
        Canned {
            name: "openai",
            rate_limited: true,
        },
        DispatchConfig {
            fallback_enabled: false,
            ..DispatchConfig::default()
        },
    );

    let response = app
        .oneshot(post_json("/v1/images/generations", json!({"prompt": "a boat"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "42");

    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "rate_limit_exceeded");
    assert!(body["error"]["message"].as_str().unwrap().contains("tried: openai"));
}

#[tokio::test]
async fn test_edit_without_image_is_rejected() {
    let response = app(Settings::default())
        .oneshot(post_json("/v1/images/edits", json!({"prompt": "add a hat"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_auth_enabled_protects_api_but_not_health() {
    let mut settings = Settings::default();
    settings.auth.enabled = true;
    settings.auth.api_keys = vec!["gateway-key-1".to_string()];
    let app = app(settings);

    let response = app.clone().oneshot(get("/v1/backends")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .uri("/v1/backends")
        .header(AUTHORIZATION, "Bearer gateway-key-1")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
