//! The conversion pipeline: validate, stage, transcode, stream.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;
use uuid::Uuid;

use wc_av::{Invocation, Invoker, ScratchDir};
use wc_core::config::{ConversionConfig, QUALITY_RANGE};
use wc_core::media::SNIFF_LEN;
use wc_core::{Error, MediaKind, SniffedFormat};

use crate::gate::ConcurrencyGate;
use crate::job::{ConversionJob, JobState};
use crate::output::OutputStream;

/// Longest file stem kept in the suggested download name.
const MAX_STEM_LEN: usize = 100;

/// Upload body as produced by the HTTP layer.
pub type UploadStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// One upload to convert.
pub struct ConversionRequest<'a> {
    pub kind: MediaKind,
    /// Client-supplied file name, used for extension checks and the
    /// download name.
    pub filename: Option<String>,
    /// Declared `Content-Type` of the upload itself.
    pub content_type: Option<String>,
    /// Declared size, if the client sent one.
    pub declared_len: Option<u64>,
    /// WebP quality override (images only).
    pub quality: Option<u8>,
    pub body: UploadStream<'a>,
}

/// A finished conversion, ready to be streamed.
#[derive(Debug)]
pub struct ConvertedMedia {
    pub job_id: Uuid,
    pub kind: MediaKind,
    pub content_type: &'static str,
    /// Suggested download name, already sanitized.
    pub file_name: String,
    pub len: u64,
    pub body: OutputStream,
}

/// Runs conversion jobs end to end.
pub struct ConversionService {
    max_upload_bytes: u64,
    timeout: Duration,
    scratch: ScratchDir,
    gate: ConcurrencyGate,
    invoker: Arc<dyn Invoker>,
}

impl ConversionService {
    pub fn new(
        max_upload_bytes: u64,
        timeout: Duration,
        scratch: ScratchDir,
        gate: ConcurrencyGate,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        Self {
            max_upload_bytes,
            timeout,
            scratch,
            gate,
            invoker,
        }
    }

    pub fn from_config(config: &ConversionConfig, invoker: Arc<dyn Invoker>) -> Self {
        Self::new(
            config.max_upload_bytes,
            config.timeout(),
            ScratchDir::new(&config.scratch_dir),
            ConcurrencyGate::from_config(config),
            invoker,
        )
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub fn invoker_name(&self) -> &'static str {
        self.invoker.name()
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Convert one upload.
    ///
    /// On success the returned [`ConvertedMedia::body`] owns the job; its
    /// resources are released once the body is consumed or dropped. On error
    /// everything is released before this returns. Dropping the future
    /// releases everything too.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for a wrong kind, size, empty or malformed
    ///   upload (a body item failing with [`io::ErrorKind::InvalidData`]).
    /// - [`Error::ServerBusy`] when no conversion slot is available.
    /// - [`Error::Storage`] when scratch storage fails.
    /// - [`Error::InvocationFailed`] / [`Error::Timeout`] from the transcoder.
    /// - [`Error::ClientAborted`] when the upload stream breaks.
    pub async fn convert(&self, request: ConversionRequest<'_>) -> wc_core::Result<ConvertedMedia> {
        let mut job = ConversionJob::new(request.kind);
        let span = tracing::info_span!("conversion", job_id = %job.id(), kind = %request.kind);

        async move {
            tracing::info!(
                filename = request.filename.as_deref().unwrap_or(""),
                declared_len = request.declared_len,
                "Conversion received"
            );
            let file_name = output_file_name(request.filename.as_deref(), request.kind);

            match self.run(&mut job, request).await {
                Ok((file, len)) => Ok(ConvertedMedia {
                    job_id: job.id(),
                    kind: job.kind(),
                    content_type: job.kind().output_content_type(),
                    file_name,
                    len,
                    body: OutputStream::new(file, len, job),
                }),
                Err(e) => {
                    match &e {
                        Error::InvocationFailed {
                            stderr: Some(stderr),
                            ..
                        } => tracing::warn!(stderr = %stderr, "Transcoder rejected upload: {e}"),
                        _ if e.http_status() >= 500 && e.http_status() != 503 => {
                            tracing::error!("Conversion failed: {e}")
                        }
                        _ => tracing::info!("Conversion rejected: {e}"),
                    }
                    job.fail(&e);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        job: &mut ConversionJob,
        request: ConversionRequest<'_>,
    ) -> wc_core::Result<(File, u64)> {
        let ConversionRequest {
            kind,
            filename,
            content_type,
            declared_len,
            quality,
            mut body,
        } = request;

        job.advance(JobState::Validating)?;
        self.check_declared(
            kind,
            filename.as_deref(),
            content_type.as_deref(),
            declared_len,
            quality,
        )?;

        job.attach_slot(self.gate.acquire().await?);

        let (head, pending) = read_head(&mut body).await?;
        if pending.is_empty() {
            return Err(Error::invalid("empty upload"));
        }
        let format = SniffedFormat::sniff(&head);
        if !kind.accepts_format(format) {
            return Err(Error::invalid(format!(
                "{} content cannot be converted as {kind}",
                format.name()
            )));
        }

        let input_extension = match format.extension() {
            Some(ext) => ext,
            None => filename
                .as_deref()
                .and_then(extension_of)
                .unwrap_or(kind.default_input_extension()),
        };
        job.attach_scratch(self.scratch.acquire(job.id(), kind, input_extension));
        let (input, output) = scratch_paths(job)?;

        let written = self.stage(&input, pending, body).await?;
        tracing::debug!(bytes = written, format = format.name(), "Upload staged");
        job.advance(JobState::Staged)?;

        job.advance(JobState::Converting)?;
        self.invoker
            .convert(Invocation {
                input: &input,
                output: &output,
                kind,
                quality: if kind == MediaKind::Image { quality } else { None },
                timeout: self.timeout,
            })
            .await?;

        let file = File::open(&output)
            .await
            .map_err(|e| Error::storage("open converted output", e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::storage("stat converted output", e))?
            .len();
        job.advance(JobState::Streaming)?;
        tracing::debug!(bytes = len, "Conversion produced output");

        Ok((file, len))
    }

    /// Checks that need no body bytes.
    fn check_declared(
        &self,
        kind: MediaKind,
        filename: Option<&str>,
        content_type: Option<&str>,
        declared_len: Option<u64>,
        quality: Option<u8>,
    ) -> wc_core::Result<()> {
        match declared_len {
            Some(0) => return Err(Error::invalid("empty upload")),
            Some(len) if len > self.max_upload_bytes => {
                return Err(Error::invalid(format!(
                    "upload of {len} bytes exceeds the {} byte limit",
                    self.max_upload_bytes
                )))
            }
            _ => {}
        }

        if let Some(content_type) = content_type {
            if !kind.accepts_content_type(content_type) {
                return Err(Error::invalid(format!(
                    "content type {content_type} is not accepted for {kind} conversion"
                )));
            }
        }

        if let Some(ext) = filename.and_then(extension_of) {
            if !kind.accepts_extension(ext) {
                return Err(Error::invalid(format!(
                    "file extension .{ext} is not accepted for {kind} conversion (expected one of {})",
                    kind.input_extensions().join(", ")
                )));
            }
        }

        if let Some(quality) = quality {
            if !QUALITY_RANGE.contains(&quality) {
                return Err(Error::invalid(format!(
                    "quality must be between {} and {}",
                    QUALITY_RANGE.start(),
                    QUALITY_RANGE.end()
                )));
            }
        }

        Ok(())
    }

    /// Write the already-read chunks and the rest of the body to `input`,
    /// enforcing the size limit on the actual byte count.
    async fn stage(
        &self,
        input: &Path,
        pending: Vec<Bytes>,
        mut body: UploadStream<'_>,
    ) -> wc_core::Result<u64> {
        let mut file = File::create(input)
            .await
            .map_err(|e| Error::storage("create scratch input", e))?;
        let mut written: u64 = 0;

        for chunk in pending {
            self.write_chunk(&mut file, &chunk, &mut written).await?;
        }
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(upload_interrupted)?;
            self.write_chunk(&mut file, &chunk, &mut written).await?;
        }

        file.flush()
            .await
            .map_err(|e| Error::storage("flush scratch input", e))?;
        Ok(written)
    }

    async fn write_chunk(
        &self,
        file: &mut File,
        chunk: &[u8],
        written: &mut u64,
    ) -> wc_core::Result<()> {
        *written += chunk.len() as u64;
        if *written > self.max_upload_bytes {
            return Err(Error::invalid(format!(
                "upload exceeds the {} byte limit",
                self.max_upload_bytes
            )));
        }
        file.write_all(chunk)
            .await
            .map_err(|e| Error::storage("write scratch input", e))
    }
}

impl std::fmt::Debug for ConversionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionService")
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("timeout", &self.timeout)
            .field("scratch", &self.scratch)
            .field("gate", &self.gate)
            .field("invoker", &self.invoker.name())
            .finish()
    }
}

/// `InvalidData` marks a body the client sent but we cannot parse; anything
/// else means the transport broke.
fn upload_interrupted(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::InvalidData => Error::invalid(format!("malformed upload body: {e}")),
        _ => Error::ClientAborted(format!("upload interrupted: {e}")),
    }
}

/// Pull chunks until at least [`SNIFF_LEN`] bytes are buffered or the body
/// ends. Returns the sniffing prefix and the chunks read so far.
async fn read_head(body: &mut UploadStream<'_>) -> wc_core::Result<(Vec<u8>, Vec<Bytes>)> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    let mut pending = Vec::new();
    while head.len() < SNIFF_LEN {
        match body.next().await {
            Some(chunk) => {
                let chunk = chunk.map_err(upload_interrupted)?;
                if chunk.is_empty() {
                    continue;
                }
                let take = (SNIFF_LEN - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
                pending.push(chunk);
            }
            None => break,
        }
    }
    Ok((head, pending))
}

fn scratch_paths(job: &ConversionJob) -> wc_core::Result<(PathBuf, PathBuf)> {
    match (job.input_path(), job.output_path()) {
        (Some(input), Some(output)) => Ok((input.to_path_buf(), output.to_path_buf())),
        _ => Err(Error::Internal("scratch files not attached".into())),
    }
}

/// Extension of the last path component, if any.
fn extension_of(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = base.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then_some(ext)
}

/// `<stem>.<webp|webm>`, keeping only characters that are safe inside a
/// quoted `Content-Disposition` filename.
pub fn output_file_name(filename: Option<&str>, kind: MediaKind) -> String {
    let base = filename
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name))
        .unwrap_or("");
    let stem = base.rsplit_once('.').map_or(base, |(stem, _)| stem);

    let clean: String = stem
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .take(MAX_STEM_LEN)
        .collect();
    let clean = clean.trim_matches(|c| c == '.' || c == '_');
    let stem = if clean.is_empty() { "converted" } else { clean };
    format!("{stem}.{}", kind.output_extension())
}
