//! Builder for executing external tool commands with timeout support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use wc_core::Error;

/// Default command timeout: 2 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Bytes of stderr retained while a tool runs. Older output is discarded.
const STDERR_RETAIN: usize = 64 * 1024;

/// Bytes of stderr kept in error excerpts.
pub const STDERR_EXCERPT: usize = 2 * 1024;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Tail of standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// stdout is discarded and stdin is closed; only stderr is captured, since
/// that is where ffmpeg reports what went wrong.
///
/// # Example
///
/// ```no_run
/// use wc_av::ToolCommand;
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// # async fn example() -> wc_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-hide_banner")
///     .arg("-version")
///     .timeout(Duration::from_secs(5))
///     .execute()
///     .await?;
/// assert!(output.status.success());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// The arguments collected so far.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Execute the command, capturing stderr.
    ///
    /// The child is spawned with `kill_on_drop`, so dropping the returned
    /// future (for example when the HTTP client goes away) also kills it.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the process outlives the timeout. The child is
    ///   killed and reaped before this returns.
    /// - [`Error::InvocationFailed`] if the process exits with a non-zero
    ///   status; the error carries a stderr excerpt.
    /// - [`Error::Internal`] if the process cannot be spawned or waited on.
    pub async fn execute(&self) -> wc_core::Result<ToolOutput> {
        let program_name = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn {program_name}: {e}")))?;
        let pid = child.id();
        tracing::debug!(tool = %program_name, ?pid, "spawned");

        // Drain stderr concurrently so a chatty child never blocks on a full pipe.
        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut retained = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            retained.extend_from_slice(&chunk[..n]);
                            if retained.len() > STDERR_RETAIN {
                                let excess = retained.len() - STDERR_RETAIN;
                                retained.drain(..excess);
                            }
                        }
                    }
                }
            }
            String::from_utf8_lossy(&retained).into_owned()
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stderr_task.abort();
                return Err(Error::Internal(format!(
                    "I/O error waiting for {program_name}: {e}"
                )));
            }
            Err(_elapsed) => {
                tracing::warn!(
                    tool = %program_name,
                    ?pid,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "timed out, killing process"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(tool = %program_name, "failed to kill timed-out process: {e}");
                }
                stderr_task.abort();
                return Err(Error::Timeout(self.timeout));
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(Error::invocation(
                format!("{program_name} exited with {status}"),
                Some(stderr_excerpt(&stderr, STDERR_EXCERPT)),
            ));
        }

        Ok(ToolOutput { status, stderr })
    }
}

/// Return at most the last `max_bytes` of `stderr`, cut on a char boundary
/// and trimmed.
pub fn stderr_excerpt(stderr: &str, max_bytes: usize) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= max_bytes {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max_bytes;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", trimmed[start..].trim_start())
}
