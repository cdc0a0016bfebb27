//! Functional tests for gateway API key authentication

use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, Request, StatusCode},
    routing::get,
    Router,
};
use imagegen_gateway::middleware::auth::AuthLayer;
use tower::ServiceExt;

fn protected_app(keys: &[&str]) -> Router {
    Router::new()
        .route("/health", get(|| async { "healthy" }))
        .route("/v1/backends", get(|| async { "[]" }))
        .layer(AuthLayer::new(keys.iter().map(|k| k.to_string()).collect()))
}

fn request(uri: &str, header: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some((name, value)) = header {
        builder = builder.header(name, value);
    }
    builder.body(Body::empty()).unwrap()
}

async fn status_of(app: Router, request: Request<Body>) -> StatusCode {
    app.oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn test_valid_bearer_token() {
    let app = protected_app(&["gateway-key-1", "gateway-key-2"]);
    let status = status_of(
        app,
        request("/v1/backends", Some((AUTHORIZATION.as_str(), "Bearer gateway-key-1"))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_bare_authorization_value() {
    let app = protected_app(&["gateway-key-1"]);
    let status = status_of(
        app,
        request("/v1/backends", Some((AUTHORIZATION.as_str(), "gateway-key-1"))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_x_api_key_header() {
    let app = protected_app(&["gateway-key-1", "gateway-key-2"]);
    let status = status_of(app, request("/v1/backends", Some(("x-api-key", "gateway-key-2")))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_key_is_rejected_with_json_error() {
    let app = protected_app(&["gateway-key-1"]);
    let response = app
        .oneshot(request(
            "/v1/backends",
            Some((AUTHORIZATION.as_str(), "Bearer wrong-key")),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");
    assert_eq!(body["error"]["code"], "invalid_api_key");
}

#[tokio::test]
async fn test_missing_key_is_rejected() {
    let app = protected_app(&["gateway-key-1"]);
    assert_eq!(
        status_of(app, request("/v1/backends", None)).await,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_health_bypasses_auth() {
    let app = protected_app(&["gateway-key-1"]);
    assert_eq!(status_of(app, request("/health", None)).await, StatusCode::OK);
}

#[tokio::test]
async fn test_no_keys_allows_all() {
    let app = protected_app(&[]);
    assert_eq!(status_of(app, request("/v1/backends", None)).await, StatusCode::OK);

    // Blank entries count as no keys
    let app = protected_app(&["", "  "]);
    assert_eq!(status_of(app, request("/v1/backends", None)).await, StatusCode::OK);
}
