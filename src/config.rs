//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms set these)
//! 2. Environment variables (APP_SERVER__PORT, APP_STORAGE__MUSIC_DIR, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Explicit configuration
//! Nothing in the upload pipeline reads ambient globals. The storage directory,
//! the allow-list and the canonical format all live here and are handed to
//! each component when it is constructed, which is what lets the tests run the
//! whole pipeline against a temporary directory.

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::path::PathBuf;

/// Main application configuration that contains all settings.
///
/// ## Rust Concepts:
/// - **#[derive(...)]**: Automatically implements common traits:
///   - `Debug`: Allows printing with {:?} for debugging
///   - `Clone`: Allows making copies of the struct
///   - `Serialize`: Can convert this struct to JSON, TOML, etc.
///   - `Deserialize`: Can create this struct from JSON, TOML, etc.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, storage, media, ...)
/// keeps each component's inputs obvious.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub media: MediaConfig,
    pub transcoder: TranscoderConfig,
    pub keepalive: KeepAliveConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Where uploaded music and the front page live.
///
/// ## Fields:
/// - `music_dir`: The single flat directory every stored file lives in
/// - `public_dir`: Directory holding `index.html` for `GET /`
/// - `max_upload_bytes`: Uploads larger than this are rejected with 413
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub music_dir: PathBuf,
    pub public_dir: PathBuf,
    pub max_upload_bytes: u64,
}

/// Upload policy: which declared types are accepted and what everything
/// converges to.
///
/// ## Fields:
/// - `allowed_types`: MIME types accepted at ingest (declared, never sniffed)
/// - `canonical_type`: Uploads declared with this type are stored as-is
/// - `canonical_extension`: Extension given to transcoded files
/// - `canonical_format`: Container name handed to the transcoder (`-f`)
///
/// Setting `allowed_types` to just the canonical type gives the strict
/// "MP3 only" behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub allowed_types: Vec<String>,
    pub canonical_type: String,
    pub canonical_extension: String,
    pub canonical_format: String,
}

/// External transcoder settings.
///
/// `timeout_secs = 0` means the transcode may run for as long as it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    pub ffmpeg_path: String,
    pub codec: String,
    pub timeout_secs: u64,
}

/// Self-ping loop that keeps free-tier hosts from idling the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    pub enabled: bool,
    pub max_interval_ms: u64,
    /// Defaults to `http://localhost:<port>/` when unset
    pub url: Option<String>,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 3000,
            },
            storage: StorageConfig {
                music_dir: PathBuf::from("music"),
                public_dir: PathBuf::from("public"),
                max_upload_bytes: 100 * 1024 * 1024,  // 100MB
            },
            media: MediaConfig {
                allowed_types: vec![
                    "audio/mpeg".to_string(),
                    "audio/wav".to_string(),
                    "audio/flac".to_string(),
                    "audio/aac".to_string(),
                    "audio/ogg".to_string(),
                ],
                canonical_type: "audio/mpeg".to_string(),
                canonical_extension: "mp3".to_string(),
                canonical_format: "mp3".to_string(),
            },
            transcoder: TranscoderConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                codec: "libmp3lame".to_string(),
                timeout_secs: 0,
            },
            keepalive: KeepAliveConfig {
                enabled: false,
                max_interval_ms: 180_000,  // 3 minutes
                url: None,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=8080`: Override server port
    /// - `APP_STORAGE__MUSIC_DIR=/data/music`: Override the storage directory
    /// - `APP_MEDIA__ALLOWED_TYPES=audio/mpeg,audio/wav`: Replace the allow-list
    /// - `APP_TRANSCODER__FFMPEG_PATH=/usr/bin/ffmpeg`: Pick a specific ffmpeg
    ///
    /// Nested keys use a double underscore because field names such as
    /// `music_dir` already contain single underscores.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("media.allowed_types"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The allow-list is not empty and contains the canonical type
    /// - The canonical extension is a bare extension (no dot, no separators)
    /// - The upload limit is greater than 0
    /// - An enabled keep-alive loop has a non-zero interval
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.media.allowed_types.is_empty() {
            return Err(anyhow::anyhow!("At least one allowed media type is required"));
        }

        if !self
            .media
            .allowed_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&self.media.canonical_type))
        {
            return Err(anyhow::anyhow!(
                "Canonical type '{}' must be in the allowed types",
                self.media.canonical_type
            ));
        }

        let ext = &self.media.canonical_extension;
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(anyhow::anyhow!(
                "Canonical extension must be non-empty and alphanumeric, got '{}'",
                ext
            ));
        }

        if self.storage.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Upload size limit must be greater than 0"));
        }

        if self.keepalive.enabled && self.keepalive.max_interval_ms == 0 {
            return Err(anyhow::anyhow!("Keep-alive interval must be greater than 0"));
        }

        Ok(())
    }

    /// URL the keep-alive loop pings.
    pub fn keepalive_url(&self) -> String {
        self.keepalive
            .url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}/", self.server.port))
    }
}
