//! Request extractors.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use once_cell::sync::Lazy;
use regex::Regex;

use super::error::ApiError;

/// Header carrying the authenticated user, set by the fronting proxy.
pub const OWNER_HEADER: &str = "x-slidepull-user";

static OWNER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").expect("static regex"));

/// The user a request acts for. Every blob and row it touches is scoped to
/// this value, so it must also be a safe blob-path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

pub fn valid_owner(value: &str) -> bool {
    OWNER_RE.is_match(value) && value != "." && value != ".." && value != ".meta"
}

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .ok_or(ApiError::Unauthorized)?;
        if !valid_owner(value) {
            return Err(ApiError::Unauthorized);
        }
        Ok(Owner(value.to_string()))
    }
}
