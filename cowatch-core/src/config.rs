use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub transcoder: TranscoderConfig,
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted WebSocket message in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Parent of every session working directory
    pub sessions_dir: PathBuf,
    /// Root of per-user media libraries (`<media_root>/<user_id>/...`)
    pub media_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("./data/sessions"),
            media_root: PathBuf::from("./data/media"),
        }
    }
}

/// External transcoder and probe tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Transcoder executable speaking the `::COMMAND` stdout protocol
    pub program: String,
    /// Arguments; `{input}` and `{output}` are substituted
    pub args: Vec<String>,
    pub ffprobe_program: String,
    pub ffmpeg_program: String,
    pub manifest_timeout_seconds: u64,
    /// Longest stdout line accepted from the transcoder
    pub max_line_length: usize,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "cowatch-transcoder".to_string(),
            args: vec![
                "--input".to_string(),
                "{input}".to_string(),
                "--output".to_string(),
                "{output}".to_string(),
            ],
            ffprobe_program: "ffprobe".to_string(),
            ffmpeg_program: "ffmpeg".to_string(),
            manifest_timeout_seconds: 120,
            max_line_length: 8 * 1024,
        }
    }
}

impl TranscoderConfig {
    #[must_use]
    pub const fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Empty sessions are evicted after this long without activity
    pub idle_timeout_seconds: u64,
    pub max_sessions: u64,
    pub max_clients_per_session: usize,
    /// Outbound queue depth per connection
    pub client_buffer: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 30 * 60,
            max_sessions: 1_000,
            max_clients_per_session: 64,
            client_buffer: 1_000,
        }
    }
}

impl SessionsConfig {
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // COWATCH_SERVER__PORT, COWATCH_SESSIONS__IDLE_TIMEOUT_SECONDS, ...
        builder = builder.add_source(
            Environment::with_prefix("COWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Collect every configuration problem; empty means valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server.max_message_size == 0 {
            errors.push("server.max_message_size must be greater than 0".to_string());
        }
        if self.transcoder.program.trim().is_empty() {
            errors.push("transcoder.program must not be empty".to_string());
        }
        if self.transcoder.ffprobe_program.trim().is_empty() {
            errors.push("transcoder.ffprobe_program must not be empty".to_string());
        }
        if self.transcoder.ffmpeg_program.trim().is_empty() {
            errors.push("transcoder.ffmpeg_program must not be empty".to_string());
        }
        if self.transcoder.manifest_timeout_seconds == 0 {
            errors.push("transcoder.manifest_timeout_seconds must be greater than 0".to_string());
        }
        if self.transcoder.max_line_length < 64 {
            errors.push("transcoder.max_line_length must be at least 64".to_string());
        }
        if self.sessions.idle_timeout_seconds == 0 {
            errors.push("sessions.idle_timeout_seconds must be greater than 0".to_string());
        }
        if self.sessions.max_sessions == 0 {
            errors.push("sessions.max_sessions must be greater than 0".to_string());
        }
        if self.sessions.max_clients_per_session == 0 {
            errors.push("sessions.max_clients_per_session must be greater than 0".to_string());
        }
        if self.sessions.client_buffer == 0 {
            errors.push("sessions.client_buffer must be greater than 0".to_string());
        }

        errors
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
