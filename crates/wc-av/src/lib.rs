//! # wc-av
//!
//! Everything that touches the filesystem or the external transcoder:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- locate ffmpeg from config or `PATH`.
//! - **Command execution** ([`ToolCommand`]) -- async builder with a hard
//!   timeout that kills the child when it expires.
//! - **Scratch files** ([`ScratchDir`], [`ScratchFiles`]) -- unique per-job
//!   temp paths that delete themselves on drop.
//! - **Transcoding** ([`Invoker`], [`FfmpegInvoker`]) -- the capability the
//!   conversion pipeline calls into.

pub mod command;
pub mod invoker;
pub mod scratch;
pub mod tools;

pub use command::{stderr_excerpt, ToolCommand, ToolOutput};
pub use invoker::{FfmpegInvoker, Invocation, Invoker};
pub use scratch::{ScratchDir, ScratchFiles};
pub use tools::{ToolInfo, ToolRegistry};
