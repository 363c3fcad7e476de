//! API key authentication.
//!
//! Keys are never stored raw: at startup each configured key is hashed
//! with sha256 over pepper+key, and presented keys are hashed the same
//! way for comparison. Production requires the pepper.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};

use crate::api::errors::ApiError;

/// Paths that stay open without a key.
const PUBLIC_PATHS: &[&str] = &["/health", "/metrics", "/ws"];

pub struct ApiKeyManager {
    hashed_keys: HashSet<String>,
    pepper: String,
}

impl ApiKeyManager {
    pub fn new(keys: &[String], pepper: Option<&str>) -> Self {
        let pepper = pepper.unwrap_or("").to_string();
        let hashed_keys = keys
            .iter()
            .map(|key| Self::hash_with(&pepper, key))
            .collect();
        Self {
            hashed_keys,
            pepper,
        }
    }

    fn hash_with(pepper: &str, key: &str) -> String {
        hex::encode(Sha256::digest(format!("{}{}", pepper, key).as_bytes()))
    }

    pub fn verify(&self, presented: &str) -> bool {
        self.hashed_keys
            .contains(&Self::hash_with(&self.pepper, presented))
    }

    /// Open mode: no keys configured means auth is not enforced
    /// (development convenience; production config validates keys exist).
    pub fn is_enforcing(&self) -> bool {
        !self.hashed_keys.is_empty()
    }
}

pub async fn api_key_middleware(
    axum::extract::State(manager): axum::extract::State<Arc<ApiKeyManager>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !manager.is_enforcing() || PUBLIC_PATHS.iter().any(|p| path.starts_with(p)) {
        return next.run(request).await;
    }

    let request_id = request
        .headers()
        .get(super::logging::REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    match request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
    {
        None => ApiError::authentication_required(request_id).into_response(),
        Some(key) if !manager.verify(key) => {
            ApiError::invalid_api_key(request_id).into_response()
        }
        Some(_) => next.run(request).await,
    }
}
