//! API key authentication.
//!
//! Conversion routes require the shared key in the `x-api-key` header. The
//! check runs before the handler, so a rejected request never creates a job
//! or touches scratch storage.

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Header carrying the shared API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Compare a presented key against the configured one in constant time.
///
/// No configured key means nothing is accepted.
pub fn verify_api_key(expected: Option<&str>, presented: &str) -> bool {
    match expected {
        Some(expected) if !expected.is_empty() => {
            bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
        }
        _ => false,
    }
}

/// Reject requests without a valid `x-api-key` with 401.
pub async fn api_key_middleware(
    State(ctx): State<AppContext>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    let rejection = match presented {
        None => Some("missing x-api-key header"),
        Some(key) if !verify_api_key(ctx.config.auth.api_key.as_deref(), key) => {
            Some("invalid API key")
        }
        Some(_) => None,
    };

    if let Some(reason) = rejection {
        tracing::warn!(path = %request.uri().path(), "Rejected request: {reason}");
        let mut err = AppError::new(wc_core::Error::Unauthorized(reason.to_string()));
        if let Some(id) = RequestId::of(&request) {
            err = err.with_request_id(id);
        }
        return Err(err);
    }

    Ok(next.run(request).await)
}
