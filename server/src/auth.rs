use axum::{
    RequestPartsExt,
    extract::FromRequestParts,
    http::request::Parts,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::{AppState, error::ApiError};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Proof that the caller presented the shared secret.
///
/// Taking this extractor as the first handler argument runs the check before
/// the body is read, so rejected calls never reach the store.
#[derive(Debug, Clone, Copy)]
pub struct Authorized;

impl FromRequestParts<AppState> for Authorized {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let supplied = match parts.headers.get(API_KEY_HEADER) {
            Some(value) => value.to_str().ok().map(|s| s.to_string()),
            None => parts
                .extract::<TypedHeader<Authorization<Bearer>>>()
                .await
                .ok()
                .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string()),
        };

        if credential_matches(state.config.api_secret.as_deref(), supplied.as_deref()) {
            Ok(Authorized)
        } else {
            tracing::warn!(
                path = %parts.uri.path(),
                credential_present = supplied.is_some(),
                "Rejected request with invalid credential"
            );
            Err(ApiError::Unauthorized)
        }
    }
}

/// Checks a supplied credential against the configured secret.
/// A missing secret on either side never matches.
pub fn credential_matches(expected: Option<&str>, supplied: Option<&str>) -> bool {
    match (expected, supplied) {
        (Some(expected), Some(supplied)) if !expected.is_empty() => {
            constant_time_eq(expected.as_bytes(), supplied.as_bytes())
        }
        _ => false,
    }
}

// Runtime depends only on the length of `a`, never on where the inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = 0u8;
    for (i, x) in a.iter().enumerate() {
        diff |= x ^ b.get(i).copied().unwrap_or(0);
    }
    diff == 0 && a.len() == b.len()
}
