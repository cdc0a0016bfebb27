//! Bearer API key authentication for the gateway surface

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::{
    collections::HashSet,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::warn;

use crate::error::AppError;

/// Paths served without a key
const PUBLIC_PATHS: &[&str] = &["/health"];

const API_KEY_HEADER: &str = "x-api-key";

/// Authentication layer; an empty key set lets every request through
#[derive(Clone)]
pub struct AuthLayer {
    api_keys: Arc<HashSet<String>>,
}

impl AuthLayer {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self {
            api_keys: Arc::new(
                api_keys
                    .into_iter()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect(),
            ),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            api_keys: self.api_keys.clone(),
        }
    }
}

/// Authentication middleware service
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    api_keys: Arc<HashSet<String>>,
}

/// Key from `Authorization: Bearer <key>`, a bare `Authorization` value, or `x-api-key`
fn presented_key(headers: &HeaderMap) -> Option<String> {
    let from_authorization = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.strip_prefix("Bearer ").unwrap_or(h).trim().to_string());

    from_authorization
        .or_else(|| {
            headers
                .get(API_KEY_HEADER)
                .and_then(|h| h.to_str().ok())
                .map(|h| h.trim().to_string())
        })
        .filter(|k| !k.is_empty())
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let public = PUBLIC_PATHS.contains(&request.uri().path());
        if public || self.api_keys.is_empty() {
            return Box::pin(self.inner.call(request));
        }

        match presented_key(request.headers()) {
            Some(key) if self.api_keys.contains(&key) => Box::pin(self.inner.call(request)),
            Some(_) => {
                warn!(path = %request.uri().path(), "Rejected request with an unknown API key");
                Box::pin(async { Ok(reject("Invalid API key")) })
            }
            None => {
                warn!(path = %request.uri().path(), "Rejected request without an API key");
                Box::pin(async {
                    Ok(reject(
                        "API key required. Provide via Authorization header: 'Bearer YOUR_API_KEY'",
                    ))
                })
            }
        }
    }
}

fn reject(message: &str) -> Response {
    AppError::AuthenticationFailed(message.to_string()).into_response()
}
