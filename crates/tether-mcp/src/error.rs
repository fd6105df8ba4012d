//! Error types for MCP operations.

use thiserror::Error;

/// Errors from MCP server communication and orchestration.
///
/// Every variant is recoverable at the client boundary: a failed call leaves
/// the client (and every other server's client) usable.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("MCP server '{name}' is not running")]
    ServerNotRunning { name: String },

    #[error("MCP server '{name}' not found")]
    ServerNotFound { name: String },

    #[error("MCP server '{name}' has not completed initialization")]
    NotInitialized { name: String },

    #[error("MCP server '{name}' is disabled in configuration")]
    Disabled { name: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("MCP server '{name}' timed out on '{method}' after {timeout_ms}ms")]
    Timeout {
        name: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("MCP server '{name}' closed its connection")]
    ConnectionClosed { name: String },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("Failed to load MCP config {path}: {message}")]
    Config { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether this error is a request timeout (as opposed to a failure
    /// reported by the server or the transport).
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }
}
