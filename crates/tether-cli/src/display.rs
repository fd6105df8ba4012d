//! Plain-text rendering of server status, tool lists and tool results.

use std::collections::BTreeMap;
use std::fmt::Write;
use tether_mcp::{McpToolContent, McpToolInfo, McpToolResult, ServerStatus};

const MAX_VALUE_LEN: usize = 60;

/// One line per configured server.
pub fn format_status(statuses: &BTreeMap<String, ServerStatus>) -> String {
    if statuses.is_empty() {
        return "No MCP servers configured.\n".to_string();
    }
    let width = statuses.keys().map(|n| n.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (name, status) in statuses {
        let tools = if status.running {
            format!("  {} tools", status.tools.len())
        } else {
            String::new()
        };
        let version = status
            .server_info
            .as_ref()
            .and_then(|info| info.version.as_deref())
            .map(|v| format!("  v{v}"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  {name:<width$}  {:<10}{tools}{version}  ({})",
            status.classification.to_string(),
            command_line(&status.command, &status.args),
        );
    }
    out
}

/// Tools grouped by server.
pub fn format_tools(tools: &BTreeMap<String, Vec<McpToolInfo>>) -> String {
    if tools.is_empty() {
        return "No running MCP servers.\n".to_string();
    }
    let mut out = String::new();
    for (server, list) in tools {
        let _ = writeln!(out, "{server}:");
        if list.is_empty() {
            let _ = writeln!(out, "  (no tools)");
        }
        for tool in list {
            if tool.description.is_empty() {
                let _ = writeln!(out, "  {}", tool.name);
            } else {
                let _ = writeln!(out, "  {}: {}", tool.name, truncate(&tool.description));
            }
        }
    }
    out
}

/// Content items of a tool result, one per line.
pub fn format_tool_result(result: &McpToolResult) -> String {
    let mut out = String::new();
    if result.is_error {
        let _ = writeln!(out, "[tool reported an error]");
    }
    for item in &result.content {
        match item {
            McpToolContent::Text { text } => {
                let _ = writeln!(out, "{text}");
            }
            McpToolContent::Image { mime_type, data } => {
                let _ = writeln!(out, "[image {mime_type}, {} bytes base64]", data.len());
            }
            McpToolContent::Audio { mime_type, data } => {
                let _ = writeln!(out, "[audio {mime_type}, {} bytes base64]", data.len());
            }
            McpToolContent::Resource { resource } => {
                let uri = resource
                    .get("uri")
                    .and_then(|u| u.as_str())
                    .unwrap_or("(no uri)");
                let _ = writeln!(out, "[resource {uri}]");
            }
            McpToolContent::Unknown => {
                let _ = writeln!(out, "[unsupported content]");
            }
        }
    }
    if let Some(structured) = &result.structured_content {
        let _ = writeln!(out, "structured: {}", summarize_value(structured));
    }
    out
}

/// Create a brief summary of a JSON value for display.
pub fn summarize_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .take(3)
                .map(|(k, v)| {
                    let val = match v {
                        serde_json::Value::String(s) => truncate(s),
                        other => truncate(&other.to_string()),
                    };
                    format!("{k}: {val}")
                })
                .collect();
            let more = if map.len() > 3 { ", ..." } else { "" };
            format!("{{{}{more}}}", parts.join(", "))
        }
        other => truncate(&other.to_string()),
    }
}

fn command_line(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    truncate(&line)
}

fn truncate(s: &str) -> String {
    if s.chars().count() > MAX_VALUE_LEN {
        let head: String = s.chars().take(MAX_VALUE_LEN).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}
