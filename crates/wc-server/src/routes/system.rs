//! Health and service information handlers. Neither requires an API key.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use wc_core::MediaKind;

use crate::context::AppContext;

const SERVICE_NAME: &str = "webconv";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub transcoder: &'static str,
    pub tools: Vec<wc_av::ToolInfo>,
    pub limits: Limits,
    pub load: Load,
    pub formats: Vec<FormatInfo>,
}

#[derive(Debug, Serialize)]
pub struct Limits {
    pub max_upload_bytes: u64,
    pub max_concurrent_conversions: usize,
    pub max_queued_conversions: usize,
    pub conversion_timeout_secs: u64,
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Serialize)]
pub struct Load {
    pub in_flight: usize,
    pub queued: usize,
}

#[derive(Debug, Serialize)]
pub struct FormatInfo {
    pub kind: MediaKind,
    pub endpoint: String,
    pub input_extensions: &'static [&'static str],
    pub output_content_type: &'static str,
}

impl FormatInfo {
    fn of(kind: MediaKind) -> Self {
        Self {
            kind,
            endpoint: format!("/convert-{kind}"),
            input_extensions: kind.input_extensions(),
            output_content_type: kind.output_content_type(),
        }
    }
}

/// GET /info
pub async fn info(State(ctx): State<AppContext>) -> Json<InfoResponse> {
    let gate = ctx.service.gate();
    Json(InfoResponse {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - ctx.started_at).num_seconds(),
        transcoder: ctx.service.invoker_name(),
        tools: ctx.tools.as_ref().clone(),
        limits: Limits {
            max_upload_bytes: ctx.service.max_upload_bytes(),
            max_concurrent_conversions: gate.capacity(),
            max_queued_conversions: gate.max_queue(),
            conversion_timeout_secs: ctx.service.timeout().as_secs(),
            rate_limit_per_minute: ctx.config.server.rate_limit_per_minute,
        },
        load: Load {
            in_flight: gate.in_flight(),
            queued: gate.queued(),
        },
        formats: vec![FormatInfo::of(MediaKind::Image), FormatInfo::of(MediaKind::Video)],
    })
}
