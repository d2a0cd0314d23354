//! Axum router construction.
//!
//! Builds the application router with the conversion routes behind rate
//! limiting and API key checks, and the open system routes.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::auth::api_key_middleware;
use crate::middleware::rate_limit::rate_limit_middleware;
use crate::middleware::request_id::{request_id_middleware, X_REQUEST_ID};
use crate::routes;
use crate::routes::convert::X_JOB_ID;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    // Upload size is enforced while streaming, not by the extractor limit.
    // Layers run bottom-up: rate limit, then API key, then the handler.
    let convert_routes = Router::new()
        .route("/convert-image", post(routes::convert::convert_image))
        .route("/convert-video", post(routes::convert::convert_video))
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn_with_state(ctx.clone(), api_key_middleware))
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            rate_limit_middleware,
        ));

    let cors = cors_layer(&ctx.config.server.cors_origins);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/info", get(routes::system::info))
        .merge(convert_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// CORS for browser clients. An empty origin list allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([
            header::CONTENT_DISPOSITION,
            header::RETRY_AFTER,
            HeaderName::from_static(X_JOB_ID),
            X_REQUEST_ID.clone(),
        ]);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use wc_core::config::Config;
    use wc_pipeline::testing::{FakeBehavior, FakeInvoker};

    const KEY: &str = "router-test-key-0000";

    fn test_ctx(scratch: &std::path::Path) -> (AppContext, Arc<FakeInvoker>) {
        let mut config = Config::default();
        config.auth.api_key = Some(KEY.into());
        config.server.rate_limit_per_minute = 0;
        config.conversion.scratch_dir = scratch.to_path_buf();
        config.conversion.max_concurrent = 1;
        let invoker = Arc::new(FakeInvoker::new(FakeBehavior::Convert));
        let ctx = AppContext::new(config, invoker.clone(), Vec::new());
        (ctx, invoker)
    }

    #[tokio::test]
    async fn health_is_open() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = test_ctx(dir.path());
        let response = build_router(ctx)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn convert_requires_key() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, invoker) = test_ctx(dir.path());
        let response = build_router(ctx)
            .oneshot(
                Request::post("/convert-image")
                    .header("x-request-id", "abc-1")
                    .body(Body::from(vec![0xFF, 0xD8, 0xFF, 0xE0]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["code"], "unauthorized");
        assert_eq!(json["request_id"], "abc-1");
        assert_eq!(invoker.calls(), 0);
    }

    #[tokio::test]
    async fn convert_streams_result() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, invoker) = test_ctx(dir.path());
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, 42];
        let response = build_router(ctx)
            .oneshot(
                Request::post("/convert-image?filename=cat.png")
                    .header("x-api-key", KEY)
                    .header("content-type", "image/png")
                    .header("content-length", png.len())
                    .body(Body::from(png))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/webp");
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"cat.webp\""
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[8..12], b"WEBP");
        assert_eq!(invoker.calls(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn truncated_multipart_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, invoker) = test_ctx(dir.path());
        let mut body = b"--XYZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n".to_vec();
        body.extend_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, 42]);

        let response = build_router(ctx.clone())
            .oneshot(
                Request::post("/convert-image")
                    .header("x-api-key", KEY)
                    .header("content-type", "multipart/form-data; boundary=XYZ")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["code"], "invalid_input");
        assert_eq!(invoker.calls(), 0);
        assert_eq!(ctx.service.gate().in_flight(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn cors_accepts_origin_lists() {
        let _ = cors_layer(&[]);
        let _ = cors_layer(&["https://example.com".to_string(), "bad\norigin".to_string()]);
    }
}
