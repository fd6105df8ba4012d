//! Stdio transport for MCP server communication.
//!
//! Spawns a child process and manages async communication over stdin/stdout
//! using newline-delimited JSON-RPC messages. Requests are correlated with
//! responses through a table of pending oneshot slots keyed by request id.

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::jsonrpc::{
    FrameDecoder, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, decode_line,
    generate_id,
};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

type PendingTable = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;

const READ_CHUNK_BYTES: usize = 8192;

/// Async stdio transport for communicating with an MCP server process.
pub(crate) struct StdioTransport {
    name: String,
    write_tx: mpsc::Sender<String>,
    pending: PendingTable,
    closed: Arc<AtomicBool>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
    child: Mutex<Child>,
}

impl StdioTransport {
    /// Spawn a child process and start background reader/writer tasks.
    ///
    /// The child inherits the parent environment with `config.env` layered on
    /// top, so overrides win on key collision.
    pub fn spawn(name: &str, config: &McpServerConfig) -> Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            source: e,
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(McpError::Protocol(format!(
                "stdio pipes were not captured for '{name}'"
            )));
        };

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        // Writer task: the only path to the child's stdin, so frames are
        // delivered whole and in issue order.
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(frame) = write_rx.recv().await {
                if stdin.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let reader_handle = tokio::spawn(read_loop(
            name.to_string(),
            stdout,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));
        let stderr_handle = tokio::spawn(drain_stderr(name.to_string(), stderr));

        tracing::debug!(server = %name, command = %config.command, "spawned MCP server");

        Ok(Self {
            name: name.to_string(),
            write_tx,
            pending,
            closed,
            reader_handle,
            writer_handle,
            stderr_handle,
            child: Mutex::new(child),
        })
    }

    /// Whether the child is still running and its stdout is still open.
    pub async fn is_alive(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    /// Send a JSON-RPC request and wait up to `timeout` for its response.
    ///
    /// Fails early if the process is gone before sending or dies while the
    /// request is outstanding.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        if !self.is_alive().await {
            return Err(McpError::ServerNotRunning {
                name: self.name.clone(),
            });
        }

        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.pending.lock().await;
            // Checked under the lock: the reader marks `closed` before it
            // drains the table, so a slot inserted here is always drained.
            if self.closed.load(Ordering::SeqCst) {
                return Err(McpError::ConnectionClosed {
                    name: self.name.clone(),
                });
            }
            let id = loop {
                let id = generate_id();
                if !pending.contains_key(&id) {
                    break id;
                }
            };
            pending.insert(id.clone(), tx);
            id
        };

        let frame = match JsonRpcRequest::new(id.clone(), method, params).encode() {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(e.into());
            }
        };

        // The queue is bounded and the child may have stopped reading stdin,
        // so the enqueue shares the request's deadline.
        match tokio::time::timeout_at(deadline, self.write_tx.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                return Err(McpError::ConnectionClosed {
                    name: self.name.clone(),
                });
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::debug!(server = %self.name, method, "MCP outbound queue full");
                return Err(self.timeout_error(method, timeout));
            }
        }
        tracing::debug!(server = %self.name, method, %id, "sent MCP request");

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(McpError::ConnectionClosed {
                name: self.name.clone(),
            }),
            Err(_) => {
                // Abandon the slot; a late response will find nothing to fill.
                self.pending.lock().await.remove(&id);
                Err(self.timeout_error(method, timeout))
            }
        }
    }

    fn timeout_error(&self, method: &str, timeout: Duration) -> McpError {
        McpError::Timeout {
            name: self.name.clone(),
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    ///
    /// Waits at most `timeout` for room in the outbound queue.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<(), McpError> {
        let frame = JsonRpcNotification::new(method, params).encode()?;

        match tokio::time::timeout(timeout, self.write_tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(McpError::ConnectionClosed {
                name: self.name.clone(),
            }),
            Err(_) => Err(self.timeout_error(method, timeout)),
        }
    }

    /// Number of requests still waiting for a response.
    #[cfg(test)]
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Shut down the transport: close stdin, wait up to `grace`, then kill.
    pub async fn shutdown(&self, grace: Duration) {
        // Dropping the writer task drops stdin, which sends EOF to the child.
        self.writer_handle.abort();

        let graceful = tokio::time::timeout(grace, async {
            let mut child = self.child.lock().await;
            child.wait().await
        })
        .await;

        match graceful {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "MCP server exited");
            }
            _ => {
                tracing::debug!(server = %self.name, "MCP server did not exit in time, killing");
                let mut child = self.child.lock().await;
                let _ = child.kill().await;
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        self.pending.lock().await.clear();
        self.reader_handle.abort();
        self.stderr_handle.abort();
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.writer_handle.abort();
        self.reader_handle.abort();
        self.stderr_handle.abort();
    }
}

/// Reader task: buffers stdout into lines, decodes them, and completes the
/// matching pending slot. Runs until stdout closes.
async fn read_loop(
    name: String,
    mut stdout: ChildStdout,
    pending: PendingTable,
    closed: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in decoder.push(&chunk[..n]) {
                    dispatch(&name, &line, &pending).await;
                }
            }
            Err(e) => {
                tracing::debug!(server = %name, "MCP stdout read failed: {e}");
                break;
            }
        }
    }
    if let Some(line) = decoder.finish() {
        dispatch(&name, &line, &pending).await;
    }

    closed.store(true, Ordering::SeqCst);
    let abandoned = {
        let mut pending = pending.lock().await;
        let count = pending.len();
        pending.clear();
        count
    };
    tracing::debug!(server = %name, abandoned, "MCP server stdout closed");
}

async fn dispatch(name: &str, line: &str, pending: &PendingTable) {
    let Some(resp) = decode_line(line) else {
        return;
    };
    let Some(id) = resp.id_key() else {
        return;
    };
    let slot = pending.lock().await.remove(&id);
    match slot {
        Some(tx) => {
            let _ = tx.send(resp);
        }
        None => {
            tracing::trace!(server = %name, %id, "dropping response with no waiting request");
        }
    }
}

/// Stderr is not part of the protocol; log it so the pipe never fills up.
async fn drain_stderr(name: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!(server = %name, "stderr: {line}");
                }
            }
        }
    }
}
