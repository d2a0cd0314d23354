//! Streaming the converted file back to the client.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use wc_core::Error;

use crate::job::ConversionJob;

/// Chunked body over a job's output file.
///
/// The stream owns the [`ConversionJob`], so the scratch files and the
/// concurrency slot stay alive until the last byte is handed to the
/// transport. Reaching the end marks the job done; dropping the stream early
/// (client disconnect) records a client abort. Cleanup happens in both cases.
pub struct OutputStream {
    inner: ReaderStream<File>,
    expected: u64,
    sent: u64,
    job: Option<ConversionJob>,
}

impl OutputStream {
    pub fn new(file: File, expected: u64, job: ConversionJob) -> Self {
        Self {
            inner: ReaderStream::new(file),
            expected,
            sent: 0,
            job: Some(job),
        }
    }

    /// Bytes handed out so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    fn complete(&mut self) {
        let Some(mut job) = self.job.take() else {
            return;
        };
        if self.sent == self.expected {
            if let Err(e) = job.finish() {
                job.fail(&e);
            }
        } else {
            job.fail(&Error::Internal(format!(
                "output ended after {} of {} bytes",
                self.sent, self.expected
            )));
        }
    }

    fn abort(&mut self, err: &Error) {
        if let Some(mut job) = self.job.take() {
            job.fail(err);
        }
    }
}

impl Stream for OutputStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!("Failed to read converted output: {e}");
                let err = Error::Internal(format!("read converted output: {e}"));
                this.abort(&err);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        // The transport may stop polling once Content-Length bytes are out.
        if self.job.is_some() && self.sent == self.expected {
            self.complete();
        } else if self.job.is_some() {
            let err = Error::ClientAborted(format!(
                "client disconnected after {} of {} bytes",
                self.sent, self.expected
            ));
            self.abort(&err);
        }
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("expected", &self.expected)
            .field("sent", &self.sent)
            .finish()
    }
}
