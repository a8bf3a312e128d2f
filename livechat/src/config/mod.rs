//! Configuration system for the `livechat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/livechat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionConfig;
use crate::session::watchdog::DEFAULT_INACTIVITY_TIMEOUT;
use crate::transport::{DEFAULT_EVENT_BUFFER, DEFAULT_POLL_INTERVAL, TransportConfig, TransportKind};

/// Base URL used when neither the CLI nor the config file sets one.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8787/";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The backend base URL is not a valid absolute URL.
    #[error("invalid backend url {url:?}: {source}")]
    InvalidUrl {
        /// The rejected value.
        url: String,
        /// Parser error.
        source: url::ParseError,
    },

    /// A numeric setting is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Config key.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    backend: BackendFileConfig,
    session: SessionFileConfig,
    ui: UiFileConfig,
}

/// `[backend]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendFileConfig {
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    transport: Option<TransportKind>,
    poll_interval_ms: Option<u64>,
    inactivity_timeout_secs: Option<u64>,
    event_buffer: Option<usize>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Backend --
    /// Base URL of the chat proxy.
    pub base_url: String,
    /// Timeout for every backend request except the event stream.
    pub request_timeout: Duration,

    // -- Session --
    /// Delivery strategy.
    pub transport: TransportKind,
    /// Interval between poll cycles.
    pub poll_interval: Duration,
    /// Idle time before the session is closed.
    pub inactivity_timeout: Duration,
    /// Capacity of the transport event channel.
    pub event_buffer: usize,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(15),
            transport: TransportKind::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path
    /// (`~/.config/livechat/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if a resolved value is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Kept separate from `load()` so it
    /// can be tested without CLI parsing.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            base_url: cli
                .base_url
                .clone()
                .or_else(|| file.backend.base_url.clone())
                .unwrap_or(defaults.base_url),
            request_timeout: file
                .backend
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            transport: cli
                .transport
                .or(file.session.transport)
                .unwrap_or(defaults.transport),
            poll_interval: file
                .session
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            inactivity_timeout: file
                .session
                .inactivity_timeout_secs
                .map_or(defaults.inactivity_timeout, Duration::from_secs),
            event_buffer: file.session.event_buffer.unwrap_or(defaults.event_buffer),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidUrl {
            url: self.base_url.clone(),
            source,
        })?;
        if self.inactivity_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "inactivity_timeout_secs",
                reason: "must be greater than zero",
            });
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_buffer",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// Build the [`SessionConfig`] for the session controller.
    #[must_use]
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            transport: TransportConfig {
                kind: self.transport,
                poll_interval: self.poll_interval,
                event_buffer: self.event_buffer,
            },
            inactivity_timeout: self.inactivity_timeout,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal client for live support chat")]
pub struct CliArgs {
    /// Base URL of the chat proxy.
    #[arg(long, env = "LIVECHAT_BASE_URL")]
    pub base_url: Option<String>,

    /// How to receive events: a server-push stream or interval polling.
    #[arg(long, value_enum, env = "LIVECHAT_TRANSPORT")]
    pub transport: Option<TransportKind>,

    /// Path to config file (default: `~/.config/livechat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "LIVECHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/livechat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and a missing
/// file is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("livechat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
