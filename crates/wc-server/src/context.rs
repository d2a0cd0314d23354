//! Application context shared by all route handlers via Axum state.
//!
//! Everything here is immutable after startup and cheap to clone.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use wc_av::{Invoker, ToolInfo};
use wc_core::config::Config;
use wc_pipeline::ConversionService;

use crate::middleware::rate_limit::{create_limiter, SharedLimiter};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub service: Arc<ConversionService>,
    /// External tool status captured at startup.
    pub tools: Arc<Vec<ToolInfo>>,
    /// Per-client limiter for conversion routes; `None` when disabled.
    pub limiter: Option<SharedLimiter>,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    pub fn new(config: Config, invoker: Arc<dyn Invoker>, tools: Vec<ToolInfo>) -> Self {
        let service = ConversionService::from_config(&config.conversion, invoker);
        let limiter = create_limiter(config.server.rate_limit_per_minute);
        Self {
            config: Arc::new(config),
            service: Arc::new(service),
            tools: Arc::new(tools),
            limiter,
            started_at: Utc::now(),
        }
    }
}
