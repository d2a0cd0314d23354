//! # wc-pipeline
//!
//! The conversion job lifecycle, built on top of `wc-av`:
//!
//! - **Admission** ([`ConcurrencyGate`]) -- bounds concurrent transcoder runs
//!   and the number of requests allowed to wait for one.
//! - **Jobs** ([`ConversionJob`], [`JobState`]) -- the per-request state
//!   machine that owns scratch files and a concurrency slot.
//! - **Service** ([`ConversionService`]) -- validate, stage, transcode, and
//!   hand back an [`OutputStream`] that finishes the job when drained.
//!
//! With the `test-util` feature, [`testing::FakeInvoker`] stands in for the
//! real transcoder.

pub mod gate;
pub mod job;
pub mod output;
pub mod service;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use gate::{ConcurrencyGate, ConcurrencySlot};
pub use job::{ConversionJob, FailureKind, JobState};
pub use output::OutputStream;
pub use service::{ConversionRequest, ConversionService, ConvertedMedia, UploadStream};
