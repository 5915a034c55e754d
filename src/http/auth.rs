//! Bearer-token transport auth for every `/v1/*` route.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use super::error::ApiError;
use super::AppState;

/// Primary environment variable holding the bearer token.
pub const AUTH_TOKEN_ENV: &str = "LITECLAW_AUTH_TOKEN";

/// Legacy fallback environment variable.
pub const API_TOKEN_ENV: &str = "LITECLAW_API_TOKEN";

/// Resolve the API token from the environment, generating a random one when
/// neither variable is set.
pub fn resolve_api_token() -> String {
    std::env::var(AUTH_TOKEN_ENV)
        .ok()
        .filter(|token| !token.is_empty())
        .or_else(|| {
            std::env::var(API_TOKEN_ENV)
                .ok()
                .filter(|token| !token.is_empty())
        })
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
}

/// Middleware: reject any request without `Authorization: Bearer <token>`.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let Some(value) = header else {
        return Err(ApiError::Unauthorized(String::from(
            "Missing authorization header",
        )));
    };
    let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));
    if !scheme.eq_ignore_ascii_case("bearer") || token != state.api_token {
        return Err(ApiError::Unauthorized(String::from("Invalid bearer token")));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_token_is_never_empty() {
        assert!(!resolve_api_token().is_empty());
    }
}
