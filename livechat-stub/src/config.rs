//! Configuration system for the `livechat-stub` dev backend.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/livechat-stub/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use crate::server::AutoReply;

/// Errors that can occur when loading stub configuration.
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
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the stub.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StubConfigFile {
    server: ServerFileConfig,
    agent: AgentFileConfig,
}

/// `[server]` section of the stub config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
}

/// `[agent]` section of the stub config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AgentFileConfig {
    auto_reply: Option<bool>,
    reply_prefix: Option<String>,
    reply_delay_ms: Option<u64>,
    name: Option<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the stub server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "LiveChat development backend")]
pub struct StubCliArgs {
    /// Address to bind the stub server to.
    #[arg(short, long, env = "LIVECHAT_STUB_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/livechat-stub/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Do not answer user messages automatically.
    #[arg(long)]
    pub no_auto_reply: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "LIVECHAT_STUB_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved stub server configuration.
#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Address to bind the server to.
    pub bind_addr: String,
    /// Canned agent behavior, if enabled.
    pub auto_reply: Option<AutoReply>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            auto_reply: Some(default_auto_reply()),
            log_level: "info".to_string(),
        }
    }
}

fn default_auto_reply() -> AutoReply {
    AutoReply {
        prefix: "You said: ".to_string(),
        delay: Duration::from_millis(800),
        agent_name: "Stub Agent".to_string(),
    }
}

impl StubConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &StubCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &StubCliArgs, file: &StubConfigFile) -> Self {
        let defaults = Self::default();
        let base = default_auto_reply();
        let enabled = !cli.no_auto_reply && file.agent.auto_reply.unwrap_or(true);

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            auto_reply: enabled.then(|| AutoReply {
                prefix: file.agent.reply_prefix.clone().unwrap_or(base.prefix),
                delay: file
                    .agent
                    .reply_delay_ms
                    .map_or(base.delay, Duration::from_millis),
                agent_name: file.agent.name.clone().unwrap_or(base.agent_name),
            }),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the stub.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<StubConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(StubConfigFile::default());
    };
    let path = config_dir.join("livechat-stub").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StubConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
