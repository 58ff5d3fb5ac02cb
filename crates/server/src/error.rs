// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

/// Error codes for the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    Validation,
    Unauthorized,
    NotFound,
    Vault,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Vault | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::Unauthorized => "AuthenticationError",
            Self::NotFound => "NotFound",
            Self::Vault => "VaultError",
            Self::Internal => "InternalError",
        }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        (
            self.http_status(),
            Json(ErrorResponse {
                error: self.as_str().to_owned(),
                message: message.into(),
                context: None,
            }),
        )
    }

    pub fn with_context(
        &self,
        message: impl Into<String>,
        context: serde_json::Value,
    ) -> (StatusCode, Json<ErrorResponse>) {
        (
            self.http_status(),
            Json(ErrorResponse {
                error: self.as_str().to_owned(),
                message: message.into(),
                context: Some(context),
            }),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable JSON error envelope: `{error, message, context?}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}
