// Configuration for the log console
//
// Configuration is loaded in order of precedence:
// 1. Environment variables (highest priority)
// 2. Config file (~/.config/lectail/config.toml)
// 3. Built-in defaults (lowest priority)

use crate::session::SessionConfig;
use crate::timeline::TimelineConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log file rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl LogRotation {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "hourly" => LogRotation::Hourly,
            "never" => LogRotation::Never,
            _ => LogRotation::Daily,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            LogRotation::Hourly => "hourly",
            LogRotation::Daily => "daily",
            LogRotation::Never => "never",
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Also write structured JSON logs to rotating files
    pub file_enabled: bool,
    pub file_dir: PathBuf,
    pub file_prefix: String,
    pub file_rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            file_dir: PathBuf::from("./logs"),
            file_prefix: "lectail".to_string(),
            file_rotation: LogRotation::Daily,
        }
    }
}

/// Streaming pipeline tunables
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Sliding retention window for timeline entries, in seconds
    pub retention_window_secs: u64,

    /// Delay before the single reconnect attempt after a drop, in seconds
    pub reconnect_delay_secs: u64,

    /// Fetch interval in poll-fallback mode, in seconds
    pub poll_interval_secs: u64,

    /// Debounce before acknowledging the latest cursor, in milliseconds
    pub ack_debounce_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            retention_window_secs: 600,
            reconnect_delay_secs: 3,
            poll_interval_secs: 2,
            ack_debounce_ms: 500,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the lecture-manager server
    pub server_url: String,

    /// Demo mode: fabricate frames instead of connecting to a server
    pub demo_mode: bool,

    /// Streaming pipeline tunables
    pub stream: StreamConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Stream settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
struct FileStream {
    retention_window_secs: Option<u64>,
    reconnect_delay_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    ack_debounce_ms: Option<u64>,
}

/// Logging settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
struct FileLogging {
    level: Option<String>,
    file_enabled: Option<bool>,
    file_dir: Option<String>,
    file_prefix: Option<String>,
    file_rotation: Option<String>,
}

/// Config file structure (subset of Config that makes sense to persist)
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    server_url: Option<String>,

    /// Optional [stream] section
    stream: Option<FileStream>,

    /// Optional [logging] section
    logging: Option<FileLogging>,
}

impl Config {
    /// Get the config file path: ~/.config/lectail/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("lectail").join("config.toml"))
    }

    /// Create config template if it doesn't exist
    /// Called during startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        // Don't overwrite existing config
        if path.exists() {
            return;
        }

        // Create parent directory
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Silently fail - config is optional
            }
        }

        let template = r#"# lectail configuration
# Uncomment and modify options as needed

# Base URL of the lecture-manager server (default: http://127.0.0.1:8000)
# server_url = "http://127.0.0.1:8000"

# Streaming pipeline tunables
# [stream]
# retention_window_secs = 600   # Timeline entries older than this are evicted
# reconnect_delay_secs = 3      # Delay before reconnecting after a drop
# poll_interval_secs = 2        # Fetch interval when push is unsupported
# ack_debounce_ms = 500         # Debounce before acknowledging the cursor

# Logging configuration
# [logging]
# level = "info"        # trace, debug, info, warn, error (RUST_LOG env var overrides)
# file_enabled = false  # Also write structured JSON logs to rotating files
# file_dir = "./logs"
# file_prefix = "lectail"
# file_rotation = "daily"  # hourly, daily, never
"#;

        // Write template (ignore errors - config is optional)
        let _ = std::fs::write(&path, template);
    }

    /// Load file config if it exists
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                FileConfig::default()
            }),
            Err(_) => FileConfig::default(), // File doesn't exist, use defaults
        }
    }

    /// Serialize config to TOML string (single source of truth for format)
    pub fn to_toml(&self) -> String {
        format!(
            r#"# lectail configuration

# Base URL of the lecture-manager server
server_url = "{server}"

# Streaming pipeline tunables
[stream]
retention_window_secs = {retention}
reconnect_delay_secs = {reconnect}
poll_interval_secs = {poll}
ack_debounce_ms = {ack}

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = "{level}"
file_enabled = {file_enabled}
file_dir = "{file_dir}"
file_prefix = "{file_prefix}"
file_rotation = "{file_rotation}"
"#,
            server = self.server_url,
            retention = self.stream.retention_window_secs,
            reconnect = self.stream.reconnect_delay_secs,
            poll = self.stream.poll_interval_secs,
            ack = self.stream.ack_debounce_ms,
            level = self.logging.level,
            file_enabled = self.logging.file_enabled,
            file_dir = self.logging.file_dir.display(),
            file_prefix = self.logging.file_prefix,
            file_rotation = self.logging.file_rotation.as_str(),
        )
    }

    /// Save current configuration to file
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = Self::config_path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config path",
            ));
        };

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&path, self.to_toml())
    }

    /// Load configuration: env vars > file > defaults
    pub fn from_env() -> Self {
        let file = Self::load_file_config();

        // Server URL: env > file > default
        let server_url = std::env::var("LECTAIL_SERVER")
            .ok()
            .or(file.server_url)
            .unwrap_or_else(|| "http://127.0.0.1:8000".to_string());

        // Demo mode: env only (runtime flag)
        let demo_mode = std::env::var("LECTAIL_DEMO")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        // Stream settings: file config only (env vars would be verbose)
        let file_stream = file.stream.unwrap_or_default();
        let defaults = StreamConfig::default();
        let stream = StreamConfig {
            retention_window_secs: file_stream
                .retention_window_secs
                .unwrap_or(defaults.retention_window_secs),
            reconnect_delay_secs: file_stream
                .reconnect_delay_secs
                .unwrap_or(defaults.reconnect_delay_secs),
            poll_interval_secs: file_stream
                .poll_interval_secs
                .unwrap_or(defaults.poll_interval_secs),
            ack_debounce_ms: file_stream.ack_debounce_ms.unwrap_or(defaults.ack_debounce_ms),
        };

        // Logging settings: file config only (RUST_LOG env var handled in main.rs)
        let file_logging = file.logging.unwrap_or_default();
        let log_defaults = LoggingConfig::default();
        let logging = LoggingConfig {
            level: file_logging.level.unwrap_or(log_defaults.level),
            file_enabled: file_logging.file_enabled.unwrap_or(log_defaults.file_enabled),
            file_dir: file_logging
                .file_dir
                .map(PathBuf::from)
                .unwrap_or(log_defaults.file_dir),
            file_prefix: file_logging.file_prefix.unwrap_or(log_defaults.file_prefix),
            file_rotation: file_logging
                .file_rotation
                .as_deref()
                .map(LogRotation::parse)
                .unwrap_or(log_defaults.file_rotation),
        };

        Self {
            server_url,
            demo_mode,
            stream,
            logging,
        }
    }

    /// Pipeline configuration derived from the stream section.
    pub fn timeline_config(&self) -> TimelineConfig {
        TimelineConfig {
            retention_window_ms: (self.stream.retention_window_secs * 1000) as i64,
            ack_debounce: Duration::from_millis(self.stream.ack_debounce_ms),
            session: SessionConfig {
                reconnect_delay: Duration::from_secs(self.stream.reconnect_delay_secs),
                poll_interval: Duration::from_secs(self.stream.poll_interval_secs),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            demo_mode: false,
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default();
        let parsed: FileConfig = toml::from_str(&config.to_toml()).unwrap();
        assert_eq!(parsed.server_url.as_deref(), Some("http://127.0.0.1:8000"));
        let stream = parsed.stream.unwrap();
        assert_eq!(stream.retention_window_secs, Some(600));
        assert_eq!(stream.ack_debounce_ms, Some(500));
        let logging = parsed.logging.unwrap();
        assert_eq!(logging.level.as_deref(), Some("info"));
        assert_eq!(logging.file_rotation.as_deref(), Some("daily"));
    }

    #[test]
    fn test_timeline_config_conversion() {
        let config = Config::default();
        let timeline = config.timeline_config();
        assert_eq!(timeline.retention_window_ms, 600_000);
        assert_eq!(timeline.ack_debounce, Duration::from_millis(500));
        assert_eq!(timeline.session.reconnect_delay, Duration::from_secs(3));
        assert_eq!(timeline.session.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_log_rotation_parse() {
        assert_eq!(LogRotation::parse("hourly"), LogRotation::Hourly);
        assert_eq!(LogRotation::parse("NEVER"), LogRotation::Never);
        assert_eq!(LogRotation::parse("anything-else"), LogRotation::Daily);
    }
}
