//! wc-server: HTTP front end for the conversion pipeline.
//!
//! This crate ties the other wc-* crates into a running server:
//!
//! - Axum-based HTTP API with API key auth, per-client rate limiting, and
//!   request ids
//! - Streaming upload and download of converted media
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use wc_av::{FfmpegInvoker, ToolRegistry};
use wc_core::config::Config;

use crate::context::AppContext;

/// How often idle rate-limiter entries are pruned.
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Start the webconv server.
///
/// Validates the configuration, prepares scratch storage, resolves the
/// transcoder, and serves HTTP until a shutdown signal arrives.
pub async fn start(config: Config) -> wc_core::Result<()> {
    for warning in config.validate()? {
        tracing::warn!("Config warning: {warning}");
    }

    // Discover external tools.
    let tools = ToolRegistry::discover(&config.tools);
    let infos = tools.check_all();
    for info in &infos {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        }
    }
    let ffmpeg = tools.require("ffmpeg")?.to_path_buf();

    let invoker = Arc::new(FfmpegInvoker::new(
        ffmpeg,
        config.conversion.image.clone(),
        config.conversion.video.clone(),
    ));
    let ctx = AppContext::new(config.clone(), invoker, infos);

    let swept = ctx.service.scratch().prepare()?;
    tracing::info!(
        dir = %ctx.service.scratch().path().display(),
        swept,
        "Scratch directory ready"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| wc_core::Error::Config(format!("invalid server address: {e}")))?;

    let app = router::build_router(ctx.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| wc_core::Error::Internal(format!("failed to bind to {addr}: {e}")))?;

    tracing::info!(
        max_concurrent = ctx.service.gate().capacity(),
        max_queued = ctx.service.gate().max_queue(),
        max_upload_bytes = ctx.service.max_upload_bytes(),
        timeout_secs = ctx.service.timeout().as_secs(),
        "Starting server on {addr}"
    );

    let cancel = CancellationToken::new();
    let prune_handle = ctx.limiter.clone().map(|limiter| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.retain_recent();
                        limiter.shrink_to_fit();
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    });

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cancel.clone()))
    .await;

    cancel.cancel();
    if let Some(handle) = prune_handle {
        let _ = handle.await;
    }

    served.map_err(|e| wc_core::Error::Internal(format!("server error: {e}")))?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_refuses_config_without_api_key() {
        let err = start(Config::default()).await.unwrap_err();
        assert!(matches!(err, wc_core::Error::Config(_)));
    }

    #[tokio::test]
    async fn shutdown_signal_follows_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), shutdown_signal(cancel))
            .await
            .unwrap();
    }
}
