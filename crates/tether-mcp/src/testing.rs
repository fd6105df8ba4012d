//! Scripted stdio servers for exercising the client against real processes.

use crate::config::McpServerConfig;

/// A minimal MCP server in POSIX sh.
///
/// Prints a banner and a stderr line on startup, emits a server notification
/// before answering `initialize`, lists two tools, never answers calls to the
/// `slow` tool, answers the `fail` tool with a JSON-RPC error, and echoes the
/// `tools/call` params back as `structuredContent` for everything else.
pub(crate) const MOCK_SERVER: &str = r##"
echo "mock server ready"
echo "mock diagnostics" >&2
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":"\([^"]*\)".*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}\n'
      printf '{"jsonrpc":"2.0","id":"%s","result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"1.2.3"}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"tools":[{"name":"echo","description":"Echo input","inputSchema":{"type":"object"}},{"name":"slow"}]}}\n' "$id"
      ;;
    *'"name":"slow"'*)
      ;;
    *'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":"%s","error":{"code":-32000,"message":"tool failed","data":{"reason":"boom"}}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      params=$(printf '%s\n' "$line" | sed -n 's/.*"params":\(.*\)}$/\1/p')
      printf '{"jsonrpc":"2.0","id":"%s","result":{"content":[{"type":"text","text":"ok"}],"isError":false,"structuredContent":%s}}\n' "$id" "$params"
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":"%s","error":{"code":-32601,"message":"Method not found"}}\n' "$id"
      ;;
  esac
done
"##;

/// Reads two requests, then answers them in reverse order with
/// `{"method": <request method>}`.
const REPLY_OUT_OF_ORDER: &str = r##"
IFS= read -r a
IFS= read -r b
ida=$(printf '%s\n' "$a" | sed -n 's/^{"jsonrpc":"2.0","id":"\([^"]*\)".*/\1/p')
idb=$(printf '%s\n' "$b" | sed -n 's/^{"jsonrpc":"2.0","id":"\([^"]*\)".*/\1/p')
ma=$(printf '%s\n' "$a" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
mb=$(printf '%s\n' "$b" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
printf '{"jsonrpc":"2.0","id":"%s","result":{"method":"%s"}}\n' "$idb" "$mb"
printf '{"jsonrpc":"2.0","id":"%s","result":{"method":"%s"}}\n' "$ida" "$ma"
cat >/dev/null
"##;

pub(crate) fn mock_server_config() -> McpServerConfig {
    McpServerConfig::new("sh", vec!["-c".to_string(), MOCK_SERVER.to_string()])
}

pub(crate) fn reply_out_of_order_config() -> McpServerConfig {
    McpServerConfig::new("sh", vec!["-c".to_string(), REPLY_OUT_OF_ORDER.to_string()])
}

pub(crate) fn cat_config() -> McpServerConfig {
    McpServerConfig::new("cat", vec![])
}
