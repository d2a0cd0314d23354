//! Service configuration.
//!
//! The top-level [`Config`] is deserialized from TOML, then overridden by
//! environment variables, then validated. Every section defaults sensibly so
//! an empty file is valid; only the API key has no default.
//!
//! The result is immutable once the server starts and is passed to component
//! constructors explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Locations searched when no config path is given.
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "./webconv.toml",
    "~/.config/webconv/config.toml",
    "/etc/webconv/config.toml",
];

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub conversion: ConversionConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Load configuration from `path`, or from the first default location
    /// that exists, or fall back to defaults.
    ///
    /// An explicitly given path must exist; default locations are optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_file(path);
        }

        for candidate in DEFAULT_CONFIG_PATHS {
            let expanded = shellexpand::tilde(candidate);
            let candidate = Path::new(expanded.as_ref());
            if candidate.exists() {
                return Self::load_file(candidate);
            }
        }

        tracing::debug!("No config file found; using defaults");
        Ok(Self::default())
    }

    fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        tracing::info!("Loaded config from {}", path.display());
        Self::from_toml(&contents)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` to resolve variable names.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("PORT") {
            self.server.port = parse_var("PORT", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_PER_MINUTE") {
            self.server.rate_limit_per_minute = parse_var("RATE_LIMIT_PER_MINUTE", &v)?;
        }
        if let Some(v) = get("CORS_ORIGINS") {
            self.server.cors_origins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = get("API_KEY") {
            self.auth.api_key = Some(v);
        }
        if let Some(v) = get("MAX_UPLOAD_BYTES") {
            self.conversion.max_upload_bytes = parse_var("MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = get("MAX_CONCURRENT_CONVERSIONS") {
            self.conversion.max_concurrent = parse_var("MAX_CONCURRENT_CONVERSIONS", &v)?;
        }
        if let Some(v) = get("MAX_QUEUED_CONVERSIONS") {
            self.conversion.max_queued = Some(parse_var("MAX_QUEUED_CONVERSIONS", &v)?);
        }
        if let Some(v) = get("QUEUE_WAIT_SECONDS") {
            self.conversion.queue_wait_secs = parse_var("QUEUE_WAIT_SECONDS", &v)?;
        }
        if let Some(v) = get("CONVERSION_TIMEOUT_SECONDS") {
            self.conversion.timeout_secs = parse_var("CONVERSION_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("SCRATCH_DIR") {
            self.conversion.scratch_dir = PathBuf::from(shellexpand::tilde(&v).as_ref());
        }
        if let Some(v) = get("IMAGE_QUALITY") {
            self.conversion.image.quality = parse_var("IMAGE_QUALITY", &v)?;
        }
        if let Some(v) = get("FFMPEG_PATH") {
            self.tools.ffmpeg_path = Some(PathBuf::from(shellexpand::tilde(&v).as_ref()));
        }

        Ok(())
    }

    /// Check the configuration.
    ///
    /// Returns hard errors as `Err`, and non-fatal issues as a list of
    /// warnings for the caller to log.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        match self.auth.api_key.as_deref() {
            None => return Err(Error::Config("API_KEY is not set".into())),
            Some(key) if key.trim().is_empty() => {
                return Err(Error::Config("API_KEY is empty".into()))
            }
            Some("changeme") => {
                warnings.push("API_KEY is still the placeholder value 'changeme'".into())
            }
            Some(key) if key.len() < 16 => {
                warnings.push("API_KEY is shorter than 16 characters".into())
            }
            Some(_) => {}
        }

        let conv = &self.conversion;
        if conv.max_upload_bytes == 0 {
            return Err(Error::Config("MAX_UPLOAD_BYTES must be greater than 0".into()));
        }
        if conv.max_concurrent == 0 {
            return Err(Error::Config(
                "MAX_CONCURRENT_CONVERSIONS must be greater than 0".into(),
            ));
        }
        if conv.timeout_secs == 0 {
            return Err(Error::Config(
                "CONVERSION_TIMEOUT_SECONDS must be greater than 0".into(),
            ));
        }
        if !QUALITY_RANGE.contains(&conv.image.quality) {
            return Err(Error::Config(format!(
                "image quality {} is outside {}..={}",
                conv.image.quality,
                QUALITY_RANGE.start(),
                QUALITY_RANGE.end()
            )));
        }
        if conv.image.compression_level > 6 {
            return Err(Error::Config("image compression_level must be 0..=6".into()));
        }

        if conv.max_queue_len() == 0 {
            warnings.push(
                "MAX_QUEUED_CONVERSIONS is 0; requests beyond the concurrency limit get 503".into(),
            );
        }
        if !conv.scratch_dir.exists() {
            warnings.push(format!(
                "scratch dir {} does not exist and will be created",
                conv.scratch_dir.display()
            ));
        }
        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        Ok(warnings)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}={value:?}: {e}")))
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Accepted range for WebP quality, both in config and per request.
pub const QUALITY_RANGE: std::ops::RangeInclusive<u8> = 60..=100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests per minute allowed per client IP on conversion routes (0 = off).
    pub rate_limit_per_minute: u32,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            rate_limit_per_minute: 20,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared key expected in the `x-api-key` header.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Upload size ceiling in bytes.
    pub max_upload_bytes: u64,
    /// Conversions allowed to run at once.
    pub max_concurrent: usize,
    /// Requests allowed to wait for a slot. `None` means twice `max_concurrent`.
    pub max_queued: Option<usize>,
    /// How long a queued request waits for a slot before giving up.
    pub queue_wait_secs: u64,
    /// Wall-clock budget for one transcoder run.
    pub timeout_secs: u64,
    /// Directory for per-request temp files.
    pub scratch_dir: PathBuf,
    pub image: ImageEncodeConfig,
    pub video: VideoEncodeConfig,
}

impl ConversionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn queue_wait(&self) -> Duration {
        Duration::from_secs(self.queue_wait_secs)
    }

    /// Effective wait-queue bound.
    pub fn max_queue_len(&self) -> usize {
        self.max_queued
            .unwrap_or_else(|| self.max_concurrent.saturating_mul(2))
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 100 * 1024 * 1024,
            max_concurrent: num_cpus::get().max(1),
            max_queued: None,
            queue_wait_secs: 30,
            timeout_secs: 120,
            scratch_dir: std::env::temp_dir().join("webconv"),
            image: ImageEncodeConfig::default(),
            video: VideoEncodeConfig::default(),
        }
    }
}

/// libwebp encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageEncodeConfig {
    /// Default lossy quality (60..=100) when the request does not specify one.
    pub quality: u8,
    /// Encoder effort, 0 (fast) to 6 (smallest output).
    pub compression_level: u8,
}

impl Default for ImageEncodeConfig {
    fn default() -> Self {
        Self {
            quality: 80,
            compression_level: 6,
        }
    }
}

/// libvpx-vp9 / libopus encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoEncodeConfig {
    pub video_bitrate: String,
    pub crf: u32,
    pub deadline: String,
    pub cpu_used: u8,
    pub audio_bitrate: String,
}

impl Default for VideoEncodeConfig {
    fn default() -> Self {
        Self {
            video_bitrate: "1M".to_string(),
            crf: 32,
            deadline: "good".to_string(),
            cpu_used: 4,
            audio_bitrate: "128k".to_string(),
        }
    }
}

/// Paths to external tools. Unset tools are discovered on `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}
