//! Lifecycle of one conversion request.
//!
//! ```text
//! Received -> Validating -> Staged -> Converting -> Streaming -> Done
//!     \__________\____________\__________\_____________\______-> Failed(kind)
//! ```
//!
//! A [`ConversionJob`] owns the job's scratch files and concurrency slot.
//! Both are released when the job is dropped, so every terminal path
//! (including a dropped request future) cleans up exactly once.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use wc_av::ScratchFiles;
use wc_core::{Error, MediaKind};

use crate::gate::ConcurrencySlot;

/// Why a job ended in [`JobState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidInput,
    Storage,
    InvocationFailed,
    Timeout,
    ClientAborted,
    ServerBusy,
}

impl FailureKind {
    /// Classify an error. Anything outside the conversion taxonomy counts as
    /// a storage-class (500) failure.
    pub fn of(err: &Error) -> Self {
        match err {
            Error::InvalidInput(_) => FailureKind::InvalidInput,
            Error::InvocationFailed { .. } => FailureKind::InvocationFailed,
            Error::Timeout(_) => FailureKind::Timeout,
            Error::ClientAborted(_) => FailureKind::ClientAborted,
            Error::ServerBusy(_) => FailureKind::ServerBusy,
            _ => FailureKind::Storage,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::Storage => "storage_error",
            FailureKind::InvocationFailed => "invocation_failed",
            FailureKind::Timeout => "timeout",
            FailureKind::ClientAborted => "client_aborted",
            FailureKind::ServerBusy => "server_busy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Validating,
    Staged,
    Converting,
    Streaming,
    Done,
    Failed(FailureKind),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed(_))
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Received, Validating)
            | (Validating, Staged)
            | (Staged, Converting)
            | (Converting, Streaming)
            | (Streaming, Done) => true,
            (from, Failed(_)) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Received => f.write_str("received"),
            JobState::Validating => f.write_str("validating"),
            JobState::Staged => f.write_str("staged"),
            JobState::Converting => f.write_str("converting"),
            JobState::Streaming => f.write_str("streaming"),
            JobState::Done => f.write_str("done"),
            JobState::Failed(kind) => write!(f, "failed({})", kind.as_str()),
        }
    }
}

/// One in-flight conversion.
#[derive(Debug)]
pub struct ConversionJob {
    id: Uuid,
    kind: MediaKind,
    state: JobState,
    started_at: DateTime<Utc>,
    started: Instant,
    error: Option<String>,
    scratch: Option<ScratchFiles>,
    slot: Option<ConcurrencySlot>,
}

impl ConversionJob {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            state: JobState::Received,
            started_at: Utc::now(),
            started: Instant::now(),
            error: None,
            scratch: None,
            slot: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn input_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchFiles::input)
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchFiles::output)
    }

    pub fn holds_slot(&self) -> bool {
        self.slot.is_some()
    }

    /// Take ownership of the job's concurrency slot.
    pub fn attach_slot(&mut self, slot: ConcurrencySlot) {
        self.slot = Some(slot);
    }

    /// Take ownership of the job's scratch files.
    pub fn attach_scratch(&mut self, files: ScratchFiles) {
        self.scratch = Some(files);
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] if the transition is not part of the lifecycle.
    pub fn advance(&mut self, next: JobState) -> wc_core::Result<()> {
        if !self.state.can_advance_to(next) {
            tracing::error!(job_id = %self.id, from = %self.state, to = %next, "Illegal job transition");
            return Err(Error::Internal(format!(
                "illegal job transition {} -> {}",
                self.state, next
            )));
        }
        tracing::debug!(job_id = %self.id, from = %self.state, to = %next, "Job transition");
        self.state = next;
        Ok(())
    }

    /// Record a terminal failure. No-op if the job already ended.
    pub fn fail(&mut self, err: &Error) {
        if self.state.is_terminal() {
            return;
        }
        let kind = FailureKind::of(err);
        tracing::debug!(job_id = %self.id, from = %self.state, failure = kind.as_str(), "Job failed");
        self.state = JobState::Failed(kind);
        self.error = Some(err.to_string());
    }

    /// Mark the job done after its output was fully delivered.
    pub fn finish(&mut self) -> wc_core::Result<()> {
        self.advance(JobState::Done)
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

impl Drop for ConversionJob {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            tracing::info!(
                job_id = %self.id,
                state = %self.state,
                "Job dropped before completion, treating as client abort"
            );
            self.state = JobState::Failed(FailureKind::ClientAborted);
        }

        // Files first: a freed slot may immediately admit a job that needs disk.
        drop(self.scratch.take());
        drop(self.slot.take());

        match self.state {
            JobState::Done => tracing::info!(
                job_id = %self.id,
                kind = %self.kind,
                elapsed_ms = self.elapsed_ms() as u64,
                "Conversion completed"
            ),
            _ => tracing::info!(
                job_id = %self.id,
                kind = %self.kind,
                outcome = %self.state,
                error = self.error.as_deref().unwrap_or(""),
                elapsed_ms = self.elapsed_ms() as u64,
                "Conversion ended"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wc_av::ScratchDir;

    use crate::gate::ConcurrencyGate;

    #[test]
    fn happy_path_transitions() {
        let mut job = ConversionJob::new(MediaKind::Image);
        for next in [
            JobState::Validating,
            JobState::Staged,
            JobState::Converting,
            JobState::Streaming,
        ] {
            job.advance(next).unwrap();
        }
        job.finish().unwrap();
        assert_eq!(job.state(), JobState::Done);
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut job = ConversionJob::new(MediaKind::Video);
        assert!(job.advance(JobState::Converting).is_err());
        assert_eq!(job.state(), JobState::Received);
        assert!(job.finish().is_err());
    }

    #[test]
    fn failure_is_reachable_from_every_non_terminal_state() {
        let states = [
            JobState::Received,
            JobState::Validating,
            JobState::Staged,
            JobState::Converting,
            JobState::Streaming,
        ];
        for state in states {
            assert!(state.can_advance_to(JobState::Failed(FailureKind::Storage)));
        }
        assert!(!JobState::Done.can_advance_to(JobState::Failed(FailureKind::Timeout)));
        assert!(!JobState::Failed(FailureKind::Timeout).can_advance_to(JobState::Done));
    }

    #[test]
    fn fail_is_sticky() {
        let mut job = ConversionJob::new(MediaKind::Image);
        job.fail(&Error::Timeout(Duration::from_secs(1)));
        job.fail(&Error::invalid("later"));
        assert_eq!(job.state(), JobState::Failed(FailureKind::Timeout));
        assert!(job.error().unwrap().contains("timed out"));
    }

    #[test]
    fn failure_classification() {
        assert_eq!(FailureKind::of(&Error::invalid("x")), FailureKind::InvalidInput);
        assert_eq!(
            FailureKind::of(&Error::invocation("x", None)),
            FailureKind::InvocationFailed
        );
        assert_eq!(FailureKind::of(&Error::Internal("x".into())), FailureKind::Storage);
        assert_eq!(
            FailureKind::of(&Error::ServerBusy("x".into())),
            FailureKind::ServerBusy
        );
    }

    #[tokio::test]
    async fn drop_releases_files_and_slot() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let gate = ConcurrencyGate::new(1, 0, Duration::from_millis(10));

        let mut job = ConversionJob::new(MediaKind::Image);
        job.attach_slot(gate.acquire().await.unwrap());
        job.attach_scratch(scratch.acquire(job.id(), MediaKind::Image, "jpg"));
        std::fs::write(job.input_path().unwrap(), b"upload").unwrap();
        job.advance(JobState::Validating).unwrap();

        assert_eq!(gate.in_flight(), 1);
        drop(job);

        assert_eq!(gate.in_flight(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
