//! Unified error type for the webconv service.
//!
//! Every stage of a conversion funnels its failures into [`Error`], which
//! carries enough context for the HTTP layer to derive a status code via
//! [`Error::http_status`] and a stable machine-readable [`Error::code`].

use std::fmt;
use std::time::Duration;

/// Unified error type covering all failure modes of a conversion request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The upload was rejected before transcoding (kind, size, content).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The caller did not present a valid API key.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Reading or writing scratch storage failed.
    #[error("Storage error [{context}]: {source}")]
    Storage {
        /// What was being attempted (e.g. "write upload").
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The transcoder ran but did not produce usable output.
    #[error("Conversion failed: {message}")]
    InvocationFailed {
        /// Client-safe description of the failure.
        message: String,
        /// Tail of the transcoder's stderr. Logged, never returned to clients.
        stderr: Option<String>,
    },

    /// The transcoder exceeded its time budget and was killed.
    #[error("Conversion timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The client went away before the request completed.
    #[error("Client aborted: {0}")]
    ClientAborted(String),

    /// The concurrency gate could not admit the request.
    #[error("Server busy: {0}")]
    ServerBusy(String),

    /// The per-client request quota was exhausted.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an HTTP status code.
    ///
    /// `ClientAborted` maps to the non-standard 499; no response is ever
    /// delivered for it, the code only shows up in logs.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidInput(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Storage { .. } => 500,
            Error::InvocationFailed { .. } => 422,
            Error::Timeout(_) => 504,
            Error::ClientAborted(_) => 499,
            Error::ServerBusy(_) => 503,
            Error::RateLimited(_) => 429,
            Error::Config(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Stable snake_case identifier used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::Unauthorized(_) => "unauthorized",
            Error::Storage { .. } => "storage_error",
            Error::InvocationFailed { .. } => "invocation_failed",
            Error::Timeout(_) => "timeout",
            Error::ClientAborted(_) => "client_aborted",
            Error::ServerBusy(_) => "server_busy",
            Error::RateLimited(_) => "rate_limited",
            Error::Config(_) => "config_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether the client may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ServerBusy(_) | Error::RateLimited(_))
    }

    /// Message that is safe to hand back to a client.
    ///
    /// Server-side failures are reduced to a generic sentence so that paths
    /// and OS error text stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::Storage { .. } | Error::Config(_) | Error::Internal(_) => {
                "Internal server error during conversion".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Convenience constructor for [`Error::InvalidInput`].
    pub fn invalid(message: impl fmt::Display) -> Self {
        Error::InvalidInput(message.to_string())
    }

    /// Convenience constructor for [`Error::Storage`].
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Storage {
            context: context.into(),
            source,
        }
    }

    /// Convenience constructor for [`Error::InvocationFailed`].
    pub fn invocation(message: impl Into<String>, stderr: Option<String>) -> Self {
        Error::InvocationFailed {
            message: message.into(),
            stderr,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
