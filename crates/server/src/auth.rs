//! Bearer auth filter
//!
//! Every RPC and dashboard request carries a bearer token. The filter
//! hashes it, resolves the owning (tenant, key) pair from the key table,
//! and attaches both to the request so handlers never see the raw token.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::state::AppState;

/// Authenticated identity attached to the request context.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub tenant_id: Uuid,
    pub key_id: Uuid,
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return unauthorized("missing bearer token");
    };

    match state.store.api_keys().lookup(&hash_token(token)).await {
        Ok(Some((tenant_id, key_id))) => {
            request
                .extensions_mut()
                .insert(AuthContext { tenant_id, key_id });
            next.run(request).await
        }
        Ok(None) => unauthorized("unknown API key"),
        Err(e) => {
            tracing::error!("key lookup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(serde_json::json!({ "error": "auth backend unavailable" })),
            )
                .into_response()
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// Constant-time comparison for shared-secret headers.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    if expected.is_empty() || presented.len() != expected.len() {
        return false;
    }
    presented
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_stable_hex() {
        let h = hash_token("vci_test_token");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_token("vci_test_token"));
        assert_ne!(h, hash_token("vci_other_token"));
    }

    #[test]
    fn secret_comparison() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cret", "S3cret"));
        assert!(!secrets_match("s3cre", "s3cret"));
        // An unset secret rejects everything rather than accepting everything.
        assert!(!secrets_match("", ""));
    }
}
