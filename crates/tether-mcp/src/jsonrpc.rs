//! JSON-RPC 2.0 types and newline-delimited framing for MCP communication.
//!
//! Outbound messages are encoded as one JSON object per line. Inbound bytes are
//! split on newlines; lines that are not JSON objects, or that carry no `id`,
//! are discarded as incidental process output rather than reported as errors.

use serde::{Deserialize, Serialize};

/// Identifier correlating a request with its response.
pub type RequestId = String;

/// Generate a fresh request identifier (UUID v4).
pub fn generate_id() -> RequestId {
    uuid::Uuid::new_v4().to_string()
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Encode as a single newline-terminated frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        encode_frame(self)
    }
}

/// A JSON-RPC 2.0 response.
///
/// Parsing is lenient: any object with an `id` is accepted, and fields the
/// server adds beyond `result`/`error` are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The response id as a lookup key. Numeric ids are normalized to their
    /// decimal form; `null` and other shapes yield `None`.
    pub fn id_key(&self) -> Option<RequestId> {
        match self.id.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }

    /// Encode as a single newline-terminated frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        encode_frame(self)
    }
}

fn encode_frame<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    // serde_json escapes embedded newlines, so one message is always one line.
    let mut frame = serde_json::to_string(message)?;
    frame.push('\n');
    Ok(frame)
}

/// Parse one line into a JSON object, or `None` if it is not one.
pub fn decode_value(line: &str) -> Option<serde_json::Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) if value.is_object() => Some(value),
        _ => {
            tracing::trace!(line, "discarding non-protocol output");
            None
        }
    }
}

/// Decode one line into a response. Lines without a usable `id` are not
/// responses and yield `None`.
pub fn decode_line(line: &str) -> Option<JsonRpcResponse> {
    let value = decode_value(line)?;
    let response: JsonRpcResponse = serde_json::from_value(value).ok()?;
    if response.id_key().is_none() {
        tracing::trace!(line, "discarding message without id");
        return None;
    }
    Some(response)
}

/// Longest line the decoder will hold while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Splits an inbound byte stream into lines, buffering partial reads.
///
/// A line that grows past the size cap is dropped as noise, through to its
/// terminating newline.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Append a chunk and return every line it completed, without the
    /// trailing newline. Invalid UTF-8 is replaced rather than rejected.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            if self.discarding {
                self.discarding = false;
            } else {
                lines.push(String::from_utf8_lossy(&self.buf[start..end]).into_owned());
            }
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_line {
            tracing::debug!(
                bytes = self.buf.len(),
                "discarding oversized line from MCP server"
            );
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        lines
    }

    /// Flush a trailing line that was never newline-terminated (at EOF).
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || rest.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    /// Number of bytes held waiting for a newline.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
