//! Error-to-HTTP response conversion.
//!
//! [`AppError`] wraps [`wc_core::Error`] and implements `IntoResponse`, so
//! route handlers and middleware can return `Result<T, AppError>` directly.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Suggested back-off for clients turned away by the concurrency gate.
pub const BUSY_RETRY_AFTER_SECS: u64 = 5;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: wc_core::Error,
    request_id: Option<String>,
    retry_after: Option<u64>,
}

impl AppError {
    pub fn new(inner: wc_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
            retry_after: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn inner(&self) -> &wc_core::Error {
        &self.inner
    }
}

impl From<wc_core::Error> for AppError {
    fn from(e: wc_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let body = json!({
            "error": self.inner.public_message(),
            "code": self.inner.code(),
            "request_id": self.request_id,
        });

        let retry_after = self.retry_after.or(match self.inner {
            wc_core::Error::ServerBusy(_) => Some(BUSY_RETRY_AFTER_SECS),
            _ => None,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (wc_core::Error::invalid("bad"), StatusCode::BAD_REQUEST),
            (
                wc_core::Error::Unauthorized("no key".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                wc_core::Error::invocation("exit 1", None),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                wc_core::Error::Timeout(Duration::from_secs(3)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                wc_core::Error::ServerBusy("full".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                wc_core::Error::storage("write", std::io::Error::other("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::new(err).into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn body_carries_code_and_request_id() {
        let response = AppError::new(wc_core::Error::invalid("empty upload"))
            .with_request_id("req-123")
            .into_response();
        let json = body_json(response).await;
        assert_eq!(json["code"], "invalid_input");
        assert_eq!(json["request_id"], "req-123");
        assert!(json["error"].as_str().unwrap().contains("empty upload"));
    }

    #[tokio::test]
    async fn stderr_and_io_details_stay_private() {
        let response = AppError::new(wc_core::Error::invocation(
            "transcoder exited with status 1",
            Some("/scratch/abc.in.jpg: Invalid data".into()),
        ))
        .into_response();
        let json = body_json(response).await;
        assert!(!json["error"].as_str().unwrap().contains("/scratch"));

        let response = AppError::new(wc_core::Error::storage(
            "write scratch input",
            std::io::Error::other("/var/tmp/webconv: No space left"),
        ))
        .into_response();
        let json = body_json(response).await;
        assert!(!json["error"].as_str().unwrap().contains("/var/tmp"));
    }

    #[test]
    fn busy_sets_retry_after() {
        let response = AppError::new(wc_core::Error::ServerBusy("full".into())).into_response();
        assert_eq!(response.headers()[RETRY_AFTER], "5");

        let response = AppError::new(wc_core::Error::RateLimited("slow down".into()))
            .with_retry_after(42)
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");

        let response = AppError::new(wc_core::Error::invalid("x")).into_response();
        assert!(response.headers().get(RETRY_AFTER).is_none());
    }
}
