//! MCP (Model Context Protocol) client and server manager for Tether.
//!
//! Supports stdio-based MCP servers that communicate via newline-delimited
//! JSON-RPC 2.0 messages. Each configured server is spawned as a child process,
//! initialized with a handshake, and its tools are listed and invoked through
//! the [`McpManager`].

pub mod client;
pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod state;
pub mod status;
#[cfg(test)]
mod testing;
mod transport;

pub use client::{
    ClientInfo, ClientState, ClientTimeouts, McpClient, McpToolContent, McpToolInfo,
    McpToolResult, ServerInfo,
};
pub use config::{McpConfig, McpServerConfig};
pub use error::McpError;
pub use manager::{ManagerSettings, McpManager};
pub use state::{EnablementSource, FileEnablement, ServerEnablement};
pub use status::{ServerClassification, ServerStatus};
