// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn headers_with(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", value.parse().expect("header value"));
    headers
}

#[test]
fn no_expected_token_disables_auth() {
    assert!(validate_bearer(&HeaderMap::new(), None).is_ok());
    assert!(validate_ws_token(None, None).is_ok());
}

#[test]
fn missing_header_is_unauthorized() {
    assert_eq!(
        validate_bearer(&HeaderMap::new(), Some("secret")),
        Err(ApiError::Unauthorized)
    );
}

#[test]
fn wrong_scheme_is_unauthorized() {
    assert_eq!(
        validate_bearer(&headers_with("Basic secret"), Some("secret")),
        Err(ApiError::Unauthorized)
    );
}

#[test]
fn wrong_token_is_unauthorized() {
    assert_eq!(
        validate_bearer(&headers_with("Bearer nope"), Some("secret")),
        Err(ApiError::Unauthorized)
    );
}

#[test]
fn correct_token_passes() {
    assert!(validate_bearer(&headers_with("Bearer secret"), Some("secret")).is_ok());
}

#[test]
fn ws_token_validation() {
    assert!(validate_ws_token(Some("secret"), Some("secret")).is_ok());
    assert_eq!(validate_ws_token(Some("nope"), Some("secret")), Err(ApiError::Unauthorized));
    assert_eq!(validate_ws_token(None, Some("secret")), Err(ApiError::Unauthorized));
}
