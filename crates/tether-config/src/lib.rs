//! Layered TOML settings for Tether.
//!
//! Reads settings from multiple sources with precedence:
//! CLI flags > env vars > settings file > defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default limit for `initialize` and `tools/list`.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default limit for `tools/call`.
pub const DEFAULT_TOOL_CALL_TIMEOUT_MS: u64 = 300_000;

/// Default time a stopping server gets before it is killed.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Default client name announced during the MCP handshake.
pub const DEFAULT_CLIENT_NAME: &str = "tether";

/// Errors from settings loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Resolved settings for a Tether process.
#[derive(Debug, Clone)]
pub struct TetherConfig {
    pub config_dir: PathBuf,
    /// The `mcpServers` JSON file.
    pub mcp_config_path: PathBuf,
    /// The per-server enablement JSON file.
    pub state_path: PathBuf,
    pub request_timeout_ms: u64,
    pub tool_call_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub client_name: String,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub mcp: McpSettings,
}

/// The `[mcp]` section of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpSettings {
    pub config_path: Option<PathBuf>,
    pub state_path: Option<PathBuf>,
    pub request_timeout_ms: Option<u64>,
    pub tool_call_timeout_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
    pub client_name: Option<String>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub mcp_config: Option<PathBuf>,
    pub state: Option<PathBuf>,
}

impl TetherConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables (`TETHER_MCP_CONFIG`, `TETHER_MCP_STATE`)
    /// 3. Settings file (~/.tether/config.toml)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::load_from_dir(config_dir(), overrides)
    }

    /// Like [`TetherConfig::load`], with an explicit config directory.
    pub fn load_from_dir(
        config_dir: PathBuf,
        overrides: CliOverrides,
    ) -> Result<Self, ConfigError> {
        let settings = load_settings_file(&config_dir.join("config.toml"))?;
        resolve(config_dir, settings, overrides, |key| std::env::var(key).ok())
    }

    /// Client settings for the MCP manager.
    pub fn manager_settings(&self) -> tether_mcp::ManagerSettings {
        tether_mcp::ManagerSettings {
            timeouts: tether_mcp::ClientTimeouts {
                request: Duration::from_millis(self.request_timeout_ms),
                tool_call: Duration::from_millis(self.tool_call_timeout_ms),
                shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            },
            client_info: tether_mcp::ClientInfo {
                name: self.client_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

fn resolve(
    config_dir: PathBuf,
    settings: SettingsFile,
    overrides: CliOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> Result<TetherConfig, ConfigError> {
    let mcp = settings.mcp;

    // Resolve server definitions: CLI > env > config file > default
    let mcp_config_path = overrides
        .mcp_config
        .or_else(|| env("TETHER_MCP_CONFIG").map(PathBuf::from))
        .or(mcp.config_path)
        .unwrap_or_else(|| config_dir.join("mcp.json"));

    // Resolve enablement state the same way
    let state_path = overrides
        .state
        .or_else(|| env("TETHER_MCP_STATE").map(PathBuf::from))
        .or(mcp.state_path)
        .unwrap_or_else(|| config_dir.join("mcp_state.json"));

    let request_timeout_ms = positive(
        "mcp.request_timeout_ms",
        mcp.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
    )?;
    let tool_call_timeout_ms = positive(
        "mcp.tool_call_timeout_ms",
        mcp.tool_call_timeout_ms.unwrap_or(DEFAULT_TOOL_CALL_TIMEOUT_MS),
    )?;
    let shutdown_grace_ms = positive(
        "mcp.shutdown_grace_ms",
        mcp.shutdown_grace_ms.unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS),
    )?;

    Ok(TetherConfig {
        mcp_config_path,
        state_path,
        request_timeout_ms,
        tool_call_timeout_ms,
        shutdown_grace_ms,
        client_name: mcp
            .client_name
            .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string()),
        config_dir,
    })
}

fn positive(key: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// Get the Tether config directory path (~/.tether/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TETHER_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tether")
}

/// Load and parse a TOML settings file. A missing file yields defaults.
fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
        Err(_) => {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            Ok(SettingsFile::default())
        }
    }
}
