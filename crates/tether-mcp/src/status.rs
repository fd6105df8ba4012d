//! Per-server status reporting.

use crate::client::{McpToolInfo, ServerInfo};
use crate::config::McpServerConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// How a configured server is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ServerClassification {
    /// Disabled statically or by the enablement state, and not running.
    Disabled,
    /// Enabled but not started (or stopped).
    Stopped,
    /// Running and serving at least one tool.
    Running,
    /// Running, but the server exposes no tools.
    NoTools,
    /// Started, but the process died or the server is failing requests.
    Error(String),
}

impl fmt::Display for ServerClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::NoTools => write!(f, "no tools"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Status of one configured server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// The static `disabled` flag from configuration.
    pub disabled: bool,
    /// The flag from the persisted enablement state.
    pub enabled: bool,
    pub running: bool,
    pub tools: Vec<McpToolInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    pub classification: ServerClassification,
}

impl ServerStatus {
    /// Status for a server with no live client.
    pub(crate) fn not_running(config: &McpServerConfig, enabled: bool) -> Self {
        let classification = if config.disabled || !enabled {
            ServerClassification::Disabled
        } else {
            ServerClassification::Stopped
        };
        Self::from_config(config, enabled, classification)
    }

    pub(crate) fn from_config(
        config: &McpServerConfig,
        enabled: bool,
        classification: ServerClassification,
    ) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            disabled: config.disabled,
            enabled,
            running: false,
            tools: Vec::new(),
            server_info: None,
            classification,
        }
    }
}
