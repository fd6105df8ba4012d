//! MCP client: manages one server process.
//!
//! Handles process start, the MCP protocol handshake (initialize +
//! initialized notification), tool discovery (tools/list), tool invocation
//! (tools/call), and shutdown. A client moves through
//! `Unstarted → Started → Initialized → Closed` and never goes back.

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::jsonrpc::JsonRpcResponse;
use crate::transport::StdioTransport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// MCP protocol version we support.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Identity sent to servers during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "tether".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Per-client timing limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// Limit for `initialize` and `tools/list`.
    pub request: Duration,
    /// Limit for `tools/call`; tools may do real work, so this is longer.
    pub tool_call: Duration,
    /// How long a closing server gets to exit before it is killed.
    pub shutdown_grace: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            tool_call: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Lifecycle state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unstarted,
    Started,
    Initialized,
    Closed,
}

/// What a server reported about itself in its `initialize` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub protocol_version: Option<String>,
}

impl ServerInfo {
    fn from_initialize_result(result: &serde_json::Value) -> Self {
        let text = |v: &serde_json::Value| v.as_str().map(str::to_string);
        Self {
            name: text(&result["serverInfo"]["name"]),
            version: text(&result["serverInfo"]["version"]),
            protocol_version: text(&result["protocolVersion"]),
        }
    }
}

/// Information about a tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of calling a tool on an MCP server.
#[derive(Debug, Clone, Serialize)]
pub struct McpToolResult {
    pub content: Vec<McpToolContent>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
}

/// A content item in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum McpToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: serde_json::Value,
    },
    /// A content kind this client does not model.
    #[serde(other)]
    Unknown,
}

/// Deserialization helpers for MCP protocol messages.
#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolEntry>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Deserialize)]
struct ToolCallResult {
    #[serde(default)]
    content: Vec<McpToolContent>,
    #[serde(default, rename = "isError")]
    is_error: bool,
    #[serde(default, rename = "structuredContent")]
    structured_content: Option<serde_json::Value>,
}

struct ClientInner {
    state: ClientState,
    transport: Option<Arc<StdioTransport>>,
    tools: Vec<McpToolInfo>,
    server_info: Option<ServerInfo>,
}

/// Client for a single MCP server.
pub struct McpClient {
    name: String,
    config: McpServerConfig,
    timeouts: ClientTimeouts,
    inner: Mutex<ClientInner>,
    /// Held for the whole handshake so only one `initialize` is in flight.
    init_lock: Mutex<()>,
}

impl McpClient {
    pub fn new(name: impl Into<String>, config: McpServerConfig, timeouts: ClientTimeouts) -> Self {
        Self {
            name: name.into(),
            config,
            timeouts,
            inner: Mutex::new(ClientInner {
                state: ClientState::Unstarted,
                transport: None,
                tools: Vec::new(),
                server_info: None,
            }),
            init_lock: Mutex::new(()),
        }
    }

    /// Spawn the server process and start reading its output.
    ///
    /// Starting an already-started client is a no-op; a closed client cannot
    /// be started again.
    pub async fn start(&self) -> Result<(), McpError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            ClientState::Unstarted => {}
            ClientState::Started | ClientState::Initialized => return Ok(()),
            ClientState::Closed => {
                return Err(McpError::ServerNotRunning {
                    name: self.name.clone(),
                });
            }
        }
        let transport = StdioTransport::spawn(&self.name, &self.config)?;
        inner.transport = Some(Arc::new(transport));
        inner.state = ClientState::Started;
        tracing::info!(server = %self.name, "MCP server started");
        Ok(())
    }

    /// Perform the MCP handshake.
    ///
    /// Sends `initialize`, waits for a successful result, then sends the
    /// `notifications/initialized` notification. Calling this on an
    /// initialized client returns the stored server info without a round trip.
    pub async fn initialize(&self, client_info: &ClientInfo) -> Result<ServerInfo, McpError> {
        let _handshake = self.init_lock.lock().await;

        let transport = {
            let inner = self.inner.lock().await;
            match inner.state {
                ClientState::Initialized => {
                    return Ok(inner.server_info.clone().unwrap_or_default());
                }
                ClientState::Started => inner.transport.clone(),
                ClientState::Unstarted | ClientState::Closed => None,
            }
        }
        .ok_or_else(|| McpError::ServerNotRunning {
            name: self.name.clone(),
        })?;

        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": true },
                "resources": { "subscribe": false, "listChanged": true },
                "prompts": { "listChanged": true }
            },
            "clientInfo": client_info,
        });

        let started = Instant::now();
        let resp = transport
            .send_request("initialize", Some(params), self.request_timeout())
            .await
            .inspect_err(|e| self.log_failure("initialize", e))?;
        let result = self.unpack_response(resp)?;
        let server_info = ServerInfo::from_initialize_result(&result);

        transport
            .send_notification("notifications/initialized", None, self.request_timeout())
            .await?;

        {
            let mut inner = self.inner.lock().await;
            if inner.state != ClientState::Started {
                // Closed while the handshake was in flight.
                return Err(McpError::ServerNotRunning {
                    name: self.name.clone(),
                });
            }
            inner.state = ClientState::Initialized;
            inner.server_info = Some(server_info.clone());
        }

        tracing::info!(
            server = %self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            server_name = server_info.name.as_deref().unwrap_or("unknown"),
            "MCP server initialized"
        );
        Ok(server_info)
    }

    /// Query the server's current tools via `tools/list`.
    ///
    /// A server with no tools yields an empty list, not an error.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let transport = self.ready_transport().await?;

        let resp = transport
            .send_request(
                "tools/list",
                Some(serde_json::json!({})),
                self.request_timeout(),
            )
            .await
            .inspect_err(|e| self.log_failure("tools/list", e))?;
        let result = self.unpack_response(resp)?;

        let tools = if result.is_null() {
            Vec::new()
        } else {
            let list: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?;
            list.tools
                .into_iter()
                .map(|t| McpToolInfo {
                    name: t.name,
                    description: t.description.unwrap_or_default(),
                    input_schema: t.input_schema,
                })
                .collect()
        };

        tracing::debug!(server = %self.name, count = tools.len(), "listed MCP tools");
        self.inner.lock().await.tools = tools.clone();
        Ok(tools)
    }

    /// Call a tool on this server.
    ///
    /// `arguments` is forwarded as given: objects and non-object values alike
    /// are placed under `arguments` without reshaping. Only `null` is
    /// replaced, by an empty object.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, McpError> {
        let transport = self.ready_transport().await?;
        let params = tool_call_params(tool_name, arguments);

        let started = Instant::now();
        let resp = transport
            .send_request("tools/call", Some(params), self.timeouts.tool_call)
            .await
            .inspect_err(|e| self.log_failure("tools/call", e))?;
        let result = self.unpack_response(resp)?;

        let call_result: ToolCallResult = if result.is_null() {
            ToolCallResult {
                content: Vec::new(),
                is_error: false,
                structured_content: None,
            }
        } else {
            serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/call result: {e}"))
            })?
        };

        tracing::debug!(
            server = %self.name,
            tool = tool_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            is_error = call_result.is_error,
            "MCP tool call finished"
        );

        Ok(McpToolResult {
            content: call_result.content,
            is_error: call_result.is_error,
            structured_content: call_result.structured_content,
        })
    }

    /// Terminate the server process: close stdin, wait for the grace period,
    /// then kill. Closing a closed client does nothing.
    pub async fn close(&self) {
        let transport = {
            let mut inner = self.inner.lock().await;
            if inner.state == ClientState::Closed {
                return;
            }
            inner.state = ClientState::Closed;
            inner.tools.clear();
            inner.transport.take()
        };
        if let Some(transport) = transport {
            transport.shutdown(self.timeouts.shutdown_grace).await;
            tracing::info!(server = %self.name, "MCP server stopped");
        }
    }

    /// Whether the server process is running.
    pub async fn is_alive(&self) -> bool {
        let transport = self.inner.lock().await.transport.clone();
        match transport {
            Some(transport) => transport.is_alive().await,
            None => false,
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.state().await == ClientState::Initialized
    }

    pub async fn state(&self) -> ClientState {
        self.inner.lock().await.state
    }

    /// The tool list from the most recent successful `list_tools`. Advisory
    /// only; prefer [`McpClient::list_tools`] for a live answer.
    pub async fn cached_tools(&self) -> Vec<McpToolInfo> {
        self.inner.lock().await.tools.clone()
    }

    /// Server info from the handshake, once initialized.
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.inner.lock().await.server_info.clone()
    }

    /// Get the server name.
    pub fn server_name(&self) -> &str {
        &self.name
    }

    /// The configuration this client was started with.
    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    fn request_timeout(&self) -> Duration {
        self.config
            .timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.timeouts.request)
    }

    /// The transport, if the handshake has completed.
    async fn ready_transport(&self) -> Result<Arc<StdioTransport>, McpError> {
        let inner = self.inner.lock().await;
        match inner.state {
            ClientState::Initialized => {
                inner
                    .transport
                    .clone()
                    .ok_or_else(|| McpError::ServerNotRunning {
                        name: self.name.clone(),
                    })
            }
            ClientState::Closed => Err(McpError::ServerNotRunning {
                name: self.name.clone(),
            }),
            ClientState::Unstarted | ClientState::Started => Err(McpError::NotInitialized {
                name: self.name.clone(),
            }),
        }
    }

    /// Unpack a response: an `error` member becomes `McpError::JsonRpc`; a
    /// missing `result` becomes `null`.
    fn unpack_response(&self, resp: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
        if let Some(err) = resp.error {
            tracing::warn!(
                server = %self.name,
                code = err.code,
                "MCP server returned error: {}",
                err.message
            );
            return Err(McpError::JsonRpc {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }
        Ok(resp.result.unwrap_or(serde_json::Value::Null))
    }

    fn log_failure(&self, method: &str, error: &McpError) {
        if error.is_timeout() {
            tracing::warn!(server = %self.name, method, "MCP request timed out");
        } else {
            tracing::warn!(server = %self.name, method, "MCP request failed: {error}");
        }
    }
}

fn tool_call_params(tool_name: &str, arguments: serde_json::Value) -> serde_json::Value {
    let arguments = if arguments.is_null() {
        serde_json::json!({})
    } else {
        arguments
    };
    serde_json::json!({
        "name": tool_name,
        "arguments": arguments,
    })
}
