//! Bearer token authentication middleware
//!
//! Every feature endpoint requires `Authorization: Bearer <token>` with a
//! token from the configured set. A missing or malformed header is 401;
//! a well-formed but unknown token is 403.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::AppState;

use super::ApiError;

pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let Some(header) = header else {
        warn!("Auth failed: missing header");
        return Err(ApiError::Unauthorized(
            "Missing Authorization header".to_string(),
        ));
    };

    let token = match header.split_once(' ') {
        Some(("Bearer", token)) if !token.is_empty() => token,
        _ => {
            warn!("Auth failed: malformed header");
            return Err(ApiError::Unauthorized(
                "Invalid Authorization format; expected 'Bearer <token>'".to_string(),
            ));
        }
    };

    if !state.tokens.contains(token) {
        warn!("Auth failed: invalid token");
        return Err(ApiError::Forbidden("Invalid or expired token".to_string()));
    }

    Ok(next.run(request).await)
}
