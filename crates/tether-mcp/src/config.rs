//! Configuration types for MCP servers.
//!
//! Server definitions come from a JSON file with a top-level `mcpServers`
//! object keyed by server name. Entries that lack a `command` (or are
//! otherwise malformed) are skipped with a warning so one bad entry cannot
//! hide the rest.

use crate::error::McpError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Top-level MCP configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default, rename = "mcpServers")]
    pub servers: BTreeMap<String, McpServerConfig>,
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Command to run (e.g., "npx", "python").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides, merged over the parent environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Statically disabled servers are never started.
    #[serde(default)]
    pub disabled: bool,
    /// Override for the metadata request timeout, in milliseconds.
    #[serde(default, rename = "timeoutMs", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl McpServerConfig {
    /// Shorthand for a command with arguments and no other settings.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            disabled: false,
            timeout_ms: None,
        }
    }
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default, rename = "mcpServers")]
    servers: BTreeMap<String, serde_json::Value>,
}

impl McpConfig {
    /// Parse a configuration document, skipping unusable server entries.
    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        let raw: RawConfig = serde_json::from_str(content)?;
        let mut servers = BTreeMap::new();
        for (name, value) in raw.servers {
            match serde_json::from_value::<McpServerConfig>(value) {
                Ok(server) if server.timeout_ms == Some(0) => {
                    tracing::warn!(
                        server = %name,
                        "Skipping MCP server entry: timeoutMs must be greater than zero"
                    );
                }
                Ok(server) => {
                    servers.insert(name, server);
                }
                Err(e) => {
                    tracing::warn!(server = %name, "Skipping MCP server entry: {e}");
                }
            }
        }
        Ok(Self { servers })
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, McpError> {
        let content = std::fs::read_to_string(path).map_err(|e| McpError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&content).map_err(|e| McpError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}
