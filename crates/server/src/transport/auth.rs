// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::AppState;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let expected = match expected {
        Some(token) => token,
        None => return Ok(()),
    };

    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Validate a WebSocket token supplied as a `?token=` query parameter.
pub fn validate_ws_token(token: Option<&str>, expected: Option<&str>) -> Result<(), ApiError> {
    let expected = match expected {
        Some(token) => token,
        None => return Ok(()),
    };
    match token {
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Axum middleware enforcing Bearer auth.
///
/// Exempt: `/health` and WebSocket upgrades (`/ws/`), whose auth runs in the
/// WS handler via query param.
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/health" || path.starts_with("/ws/") {
        return next.run(req).await;
    }

    let expected = state.effective_auth_token().await;
    if let Err(code) = validate_bearer(req.headers(), expected.as_deref()) {
        return code.to_http_response("missing or invalid bearer token").into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
