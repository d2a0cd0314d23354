//! A scriptable stand-in for the transcoder.
//!
//! [`FakeInvoker`] implements [`Invoker`] without spawning anything, and
//! records how it was called so tests can assert on invocation counts and
//! peak concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use wc_av::invoker::verify_output;
use wc_av::{Invocation, Invoker};
use wc_core::media::SNIFF_LEN;
use wc_core::{Error, MediaKind, SniffedFormat};

/// What the fake does when asked to convert.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Write a plausible output for recognised input; reject unrecognised
    /// bytes like a real decoder would.
    Convert,
    /// Exit non-zero with the given stderr.
    Fail(String),
    /// Never finish; the invocation times out.
    Hang,
    /// Exit zero without producing any output bytes.
    Empty,
}

#[derive(Debug)]
pub struct FakeInvoker {
    behavior: FakeBehavior,
    delay: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeInvoker {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Spend `delay` "transcoding" before acting.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of conversions started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Conversions currently in progress.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of conversions that were ever in progress together.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Invoker for FakeInvoker {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn convert(&self, invocation: Invocation<'_>) -> wc_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.running);

        if !self.delay.is_zero() {
            if self.delay >= invocation.timeout {
                tokio::time::sleep(invocation.timeout).await;
                return Err(Error::Timeout(invocation.timeout));
            }
            tokio::time::sleep(self.delay).await;
        }

        match &self.behavior {
            FakeBehavior::Convert => {
                let input = tokio::fs::read(invocation.input)
                    .await
                    .map_err(|e| Error::storage("read fake input", e))?;
                let head = &input[..input.len().min(SNIFF_LEN)];
                if SniffedFormat::sniff(head) == SniffedFormat::Unknown {
                    return Err(Error::invocation(
                        "transcoder exited with status 1",
                        Some(format!(
                            "{}: Invalid data found when processing input",
                            invocation.input.display()
                        )),
                    ));
                }
                tokio::fs::write(invocation.output, fake_output(invocation.kind, &input))
                    .await
                    .map_err(|e| Error::storage("write fake output", e))?;
                verify_output(invocation.output).await
            }
            FakeBehavior::Fail(stderr) => Err(Error::invocation(
                "transcoder exited with status 1",
                Some(stderr.clone()),
            )),
            FakeBehavior::Hang => {
                tokio::time::sleep(invocation.timeout).await;
                Err(Error::Timeout(invocation.timeout))
            }
            FakeBehavior::Empty => {
                tokio::fs::write(invocation.output, b"")
                    .await
                    .map_err(|e| Error::storage("write fake output", e))?;
                verify_output(invocation.output).await
            }
        }
    }
}

/// Output that sniffs as the kind's target format and depends only on the
/// input bytes.
fn fake_output(kind: MediaKind, input: &[u8]) -> Vec<u8> {
    let mut out = match kind {
        MediaKind::Image => {
            let mut header = b"RIFF".to_vec();
            header.extend_from_slice(&(input.len() as u32 + 4).to_le_bytes());
            header.extend_from_slice(b"WEBPVP8 ");
            header
        }
        MediaKind::Video => vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01],
    };
    out.extend(input.iter().rev());
    out
}
