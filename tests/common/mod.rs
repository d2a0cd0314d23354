//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a full [`AppContext`] around a [`FakeInvoker`] and
//! a throwaway scratch directory, then serves the router on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use wc_core::config::Config;
use wc_pipeline::testing::{FakeBehavior, FakeInvoker};
use wc_server::context::AppContext;
use wc_server::router::build_router;

pub const API_KEY: &str = "integration-test-key-0123";

pub const JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xD9,
];
pub const PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R',
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
];
pub const MP4: &[u8] = &[
    0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm', 0x00, 0x00, 0x02,
    0x00, b'i', b's', b'o', b'm', b'm', b'p', b'4', b'1',
];
pub const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xff\xff\xff";

/// Config suited to tests: small limits, no rate limiting.
pub fn test_config(scratch: &Path) -> Config {
    let mut config = Config::default();
    config.auth.api_key = Some(API_KEY.into());
    config.server.rate_limit_per_minute = 0;
    config.conversion.scratch_dir = scratch.to_path_buf();
    config.conversion.max_upload_bytes = 64 * 1024;
    config.conversion.max_concurrent = 2;
    config.conversion.max_queued = Some(2);
    config.conversion.queue_wait_secs = 10;
    config.conversion.timeout_secs = 1;
    config
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub invoker: Arc<FakeInvoker>,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    scratch: tempfile::TempDir,
}

impl TestHarness {
    /// Server with a well-behaved fake transcoder and default test config.
    pub async fn start() -> Self {
        Self::start_with(FakeInvoker::new(FakeBehavior::Convert), |_| {}).await
    }

    pub async fn with_behavior(behavior: FakeBehavior) -> Self {
        Self::start_with(FakeInvoker::new(behavior), |_| {}).await
    }

    /// Server with a custom fake and config tweaks applied on top of
    /// [`test_config`].
    pub async fn start_with(invoker: FakeInvoker, tweak: impl FnOnce(&mut Config)) -> Self {
        let scratch = tempfile::tempdir().expect("failed to create scratch dir");
        let mut config = test_config(scratch.path());
        tweak(&mut config);

        let invoker = Arc::new(invoker);
        let ctx = AppContext::new(config, invoker.clone(), Vec::new());
        let app = build_router(ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .ok();
        });

        Self {
            ctx,
            invoker,
            addr,
            client: reqwest::Client::new(),
            scratch,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// POST `body` to a conversion endpoint with the test API key.
    pub async fn convert(&self, path: &str, body: &[u8]) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("x-api-key", API_KEY)
            .body(body.to_vec())
            .send()
            .await
            .expect("request failed")
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Wait until the scratch directory is empty and no slot is held.
    ///
    /// The server releases a job when the response body is dropped, which
    /// can land a moment after the client has read the last byte.
    pub async fn assert_released(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let idle = self.scratch_entries() == 0 && self.ctx.service.gate().in_flight() == 0;
            if idle {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "job resources not released: {} scratch entries, {} slots in use",
                    self.scratch_entries(),
                    self.ctx.service.gate().in_flight()
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
