//! Transcoder invocation.
//!
//! [`Invoker`] is the seam between the conversion pipeline and the external
//! transcoder. [`FfmpegInvoker`] is the production implementation; tests
//! substitute their own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use wc_core::config::{ImageEncodeConfig, VideoEncodeConfig};
use wc_core::{Error, MediaKind};

use crate::command::ToolCommand;

/// One transcoder run.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub kind: MediaKind,
    /// WebP quality override for image conversions.
    pub quality: Option<u8>,
    pub timeout: Duration,
}

/// Converts `input` into `output` for a given [`MediaKind`].
///
/// Implementations must not retry: a failure is reported to the caller as-is.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Short name for logs (e.g. "ffmpeg").
    fn name(&self) -> &'static str;

    /// Run the conversion.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] when the run exceeds `invocation.timeout`.
    /// - [`Error::InvocationFailed`] on a non-zero exit or a missing/empty output.
    /// - [`Error::Internal`] when the transcoder cannot be started.
    async fn convert(&self, invocation: Invocation<'_>) -> wc_core::Result<()>;
}

/// Runs ffmpeg with fixed per-kind encoder settings.
#[derive(Debug, Clone)]
pub struct FfmpegInvoker {
    program: PathBuf,
    image: ImageEncodeConfig,
    video: VideoEncodeConfig,
}

impl FfmpegInvoker {
    pub fn new(program: PathBuf, image: ImageEncodeConfig, video: VideoEncodeConfig) -> Self {
        Self {
            program,
            image,
            video,
        }
    }

    /// Build the ffmpeg argument list for `invocation`.
    pub fn build_args(&self, invocation: &Invocation<'_>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            invocation.input.to_string_lossy().into_owned(),
        ];

        match invocation.kind {
            MediaKind::Image => {
                let quality = invocation.quality.unwrap_or(self.image.quality);
                args.extend([
                    "-map_metadata".to_string(),
                    "0".to_string(),
                    "-frames:v".to_string(),
                    "1".to_string(),
                    "-c:v".to_string(),
                    "libwebp".to_string(),
                    "-quality".to_string(),
                    quality.to_string(),
                    "-compression_level".to_string(),
                    self.image.compression_level.to_string(),
                ]);
            }
            MediaKind::Video => {
                args.extend([
                    "-c:v".to_string(),
                    "libvpx-vp9".to_string(),
                    "-b:v".to_string(),
                    self.video.video_bitrate.clone(),
                    "-crf".to_string(),
                    self.video.crf.to_string(),
                    "-deadline".to_string(),
                    self.video.deadline.clone(),
                    "-cpu-used".to_string(),
                    self.video.cpu_used.to_string(),
                    "-row-mt".to_string(),
                    "1".to_string(),
                    "-c:a".to_string(),
                    "libopus".to_string(),
                    "-b:a".to_string(),
                    self.video.audio_bitrate.clone(),
                    "-f".to_string(),
                    "webm".to_string(),
                ]);
            }
        }

        args.push(invocation.output.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl Invoker for FfmpegInvoker {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn convert(&self, invocation: Invocation<'_>) -> wc_core::Result<()> {
        let args = self.build_args(&invocation);
        tracing::debug!("FFmpeg args: {:?}", args);

        ToolCommand::new(self.program.clone())
            .args(args)
            .timeout(invocation.timeout)
            .execute()
            .await?;

        verify_output(invocation.output).await
    }
}

/// Treat a missing or empty output file as a failed conversion, even after a
/// zero exit status.
pub async fn verify_output(output: &Path) -> wc_core::Result<()> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(Error::invocation(
            "transcoder produced an empty output",
            None,
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::invocation(
            "transcoder produced no output",
            None,
        )),
        Err(e) => Err(Error::storage("stat converted output", e)),
    }
}
