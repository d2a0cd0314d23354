//! # wc-core
//!
//! Shared types for the webconv workspace:
//!
//! - [`Error`] / [`Result`] -- the unified error taxonomy with HTTP mapping.
//! - [`config`] -- the immutable service configuration and its loaders.
//! - [`media`] -- conversion kinds, formats and magic-byte sniffing.

pub mod config;
pub mod error;
pub mod media;

pub use config::Config;
pub use error::{Error, Result};
pub use media::{MediaKind, SniffedFormat};
