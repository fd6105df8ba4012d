//! Tether CLI: start, inspect and call stdio MCP servers.

mod display;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tether_config::{CliOverrides, TetherConfig};
use tether_mcp::{FileEnablement, McpManager};

#[derive(Parser)]
#[command(name = "tether", version, about = "Manage and call stdio MCP servers")]
struct Cli {
    /// Path to the MCP server definitions (overrides TETHER_MCP_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the server enablement state (overrides TETHER_MCP_STATE)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show every configured server and how it is doing
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List the tools of every running server
    Tools {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Call one tool and print its result
    Call {
        server: String,
        tool: String,
        /// Tool arguments as JSON
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Interactive session (the default)
    Repl,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = TetherConfig::load(CliOverrides {
        mcp_config: cli.config,
        state: cli.state,
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let manager = McpManager::new(
        config.manager_settings(),
        Arc::new(FileEnablement::new(&config.state_path)),
    );
    load_servers(&manager, &config).await?;

    let result = match cli.command.unwrap_or(Command::Repl) {
        Command::Status { json } => print_status(&manager, json).await,
        Command::Tools { json } => print_tools(&manager, json).await,
        Command::Call { server, tool, args } => call_tool(&manager, &server, &tool, &args).await,
        Command::Repl => repl(&manager, &config).await,
    };

    manager.close_all().await;
    result
}

async fn load_servers(manager: &McpManager, config: &TetherConfig) -> Result<()> {
    let path = &config.mcp_config_path;
    if !path.exists() {
        tracing::info!("No MCP config at {}", path.display());
        manager.set_config_path(path).await;
        return Ok(());
    }
    let running = manager
        .load_from_config(path)
        .await
        .with_context(|| format!("Failed to load MCP servers from {}", path.display()))?;
    tracing::debug!(running, "MCP servers ready");
    Ok(())
}

async fn print_status(manager: &McpManager, json: bool) -> Result<()> {
    let status = manager.get_server_status().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", display::format_status(&status));
    }
    Ok(())
}

async fn print_tools(manager: &McpManager, json: bool) -> Result<()> {
    let tools = manager.get_all_tools().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
    } else {
        print!("{}", display::format_tools(&tools));
    }
    Ok(())
}

async fn call_tool(manager: &McpManager, server: &str, tool: &str, args: &str) -> Result<()> {
    let args: serde_json::Value =
        serde_json::from_str(args).context("Tool arguments must be valid JSON")?;
    let result = manager
        .call_tool(server, tool, args)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    print!("{}", display::format_tool_result(&result));
    Ok(())
}

async fn repl(manager: &McpManager, config: &TetherConfig) -> Result<()> {
    let stdin = io::stdin();

    let config_note = if config.mcp_config_path.exists() {
        String::new()
    } else {
        " (not found, /start re-reads it)".to_string()
    };
    eprintln!(
        "tether v{} ({} of {} servers running, config: {}{})",
        env!("CARGO_PKG_VERSION"),
        manager.client_count().await,
        manager.configured_servers().await.len(),
        config.mcp_config_path.display(),
        config_note
    );
    eprintln!("Type /help for commands. Press Ctrl+D to exit.\n");

    loop {
        eprint!("> ");
        io::stderr().flush()?;

        let mut input = String::new();
        let bytes_read = stdin.lock().read_line(&mut input)?;
        if bytes_read == 0 {
            eprintln!();
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match handle_slash_command(input, manager).await {
            Some(SlashResult::Continue) => {}
            Some(SlashResult::Break) => break,
            Some(SlashResult::Unknown) => {
                eprintln!("Unknown command: {input}. Type /help for available commands.");
            }
            None => eprintln!("Commands start with '/'. Type /help for available commands."),
        }
    }

    Ok(())
}

enum SlashResult {
    Continue,
    Break,
    Unknown,
}

async fn handle_slash_command(input: &str, manager: &McpManager) -> Option<SlashResult> {
    if !input.starts_with('/') {
        return None;
    }

    let (cmd, args) = match input.split_once(' ') {
        Some((c, a)) => (c, Some(a.trim()).filter(|a| !a.is_empty())),
        None => (input, None),
    };

    match cmd {
        "/quit" | "/exit" => Some(SlashResult::Break),
        "/help" => {
            print_help();
            Some(SlashResult::Continue)
        }
        "/status" => {
            eprint!("{}", display::format_status(&manager.get_server_status().await));
            Some(SlashResult::Continue)
        }
        "/tools" => {
            eprint!("{}", display::format_tools(&manager.get_all_tools().await));
            Some(SlashResult::Continue)
        }
        "/call" => {
            match args.map(parse_call_args) {
                Some(Ok((server, tool, arguments))) => {
                    match manager.call_tool(server, tool, arguments).await {
                        Ok(result) => print!("{}", display::format_tool_result(&result)),
                        Err(e) => eprintln!("Error: {e}"),
                    }
                }
                Some(Err(message)) => eprintln!("{message}"),
                None => eprintln!("Usage: /call <server> <tool> [json-arguments]"),
            }
            Some(SlashResult::Continue)
        }
        "/start" | "/stop" | "/restart" => {
            let Some(name) = args else {
                eprintln!("Usage: {cmd} <server>");
                return Some(SlashResult::Continue);
            };
            let outcome = match cmd {
                "/start" => manager.start_server(name).await,
                "/stop" => manager.stop_server(name).await,
                _ => manager.restart_server(name).await,
            };
            match outcome {
                Ok(()) => eprintln!("{}: {}", name, &cmd[1..]),
                Err(e) => eprintln!("Error: {e}"),
            }
            Some(SlashResult::Continue)
        }
        _ => Some(SlashResult::Unknown),
    }
}

/// Split `/call` arguments into server, tool and optional JSON arguments.
fn parse_call_args(args: &str) -> Result<(&str, &str, serde_json::Value), String> {
    let mut parts = args.splitn(3, char::is_whitespace);
    let (Some(server), Some(tool)) = (parts.next(), parts.next()) else {
        return Err("Usage: /call <server> <tool> [json-arguments]".to_string());
    };
    let arguments = match parts.next().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            serde_json::from_str(raw).map_err(|e| format!("Invalid JSON arguments: {e}"))?
        }
        _ => serde_json::json!({}),
    };
    Ok((server, tool, arguments))
}

fn print_help() {
    eprintln!("Available commands:");
    eprintln!("  /help                          Show this help");
    eprintln!("  /status                        Show every configured server");
    eprintln!("  /tools                         List tools of running servers");
    eprintln!("  /call <server> <tool> [json]   Call a tool");
    eprintln!("  /start <server>                Start a server");
    eprintln!("  /stop <server>                 Stop a server");
    eprintln!("  /restart <server>              Restart a server");
    eprintln!("  /quit                          Exit");
}
