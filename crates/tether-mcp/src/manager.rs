//! MCP manager: orchestrates multiple MCP server processes.
//!
//! The manager owns one [`McpClient`] per started server, keyed by server
//! name. A server missing from that map is reported as stopped. One server's
//! failure is always contained: it is logged and skipped, and every other
//! server keeps working.

use crate::client::{ClientInfo, ClientTimeouts, McpClient, McpToolInfo, McpToolResult};
use crate::config::{McpConfig, McpServerConfig};
use crate::error::McpError;
use crate::state::EnablementSource;
use crate::status::{ServerClassification, ServerStatus};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Settings applied to every client the manager creates.
#[derive(Debug, Clone, Default)]
pub struct ManagerSettings {
    pub timeouts: ClientTimeouts,
    pub client_info: ClientInfo,
}

#[derive(Default)]
struct LoadedConfig {
    path: Option<PathBuf>,
    config: McpConfig,
}

/// Manages connections to multiple MCP servers.
pub struct McpManager {
    settings: ManagerSettings,
    enablement: Arc<dyn EnablementSource>,
    loaded: Mutex<LoadedConfig>,
    clients: RwLock<HashMap<String, Arc<McpClient>>>,
    /// Serializes start/stop/load so a server never gets two clients.
    control: Mutex<()>,
}

impl McpManager {
    pub fn new(settings: ManagerSettings, enablement: Arc<dyn EnablementSource>) -> Self {
        Self {
            settings,
            enablement,
            loaded: Mutex::new(LoadedConfig::default()),
            clients: RwLock::new(HashMap::new()),
            control: Mutex::new(()),
        }
    }

    /// Read server definitions from `path` and start every server that is
    /// enabled both in configuration and in the enablement state.
    ///
    /// Servers that fail to start are logged and skipped. Servers already
    /// running with an unchanged definition are left alone; servers that
    /// disappeared from the file are stopped. Returns the number of running
    /// servers.
    pub async fn load_from_config(&self, path: &Path) -> Result<usize, McpError> {
        let _control = self.control.lock().await;

        let config = McpConfig::load(path)?;
        self.apply_config(Some(path.to_path_buf()), config.clone()).await;
        let enablement = self.enablement.load();

        for (name, server) in &config.servers {
            if server.disabled {
                tracing::debug!(server = %name, "skipping MCP server disabled in config");
                continue;
            }
            if !enablement.is_enabled(name) {
                tracing::debug!(server = %name, "skipping MCP server disabled in state");
                continue;
            }
            if let Some(client) = self.client(name).await {
                if client.config() == server && self.is_serving(&client).await {
                    continue;
                }
                self.remove_and_close(name).await;
            }
            if let Err(e) = self.launch(name, server).await {
                tracing::warn!(server = %name, "Failed to start MCP server: {e}");
            }
        }

        let running = self.clients.read().await.len();
        tracing::info!(
            running,
            configured = config.servers.len(),
            "MCP servers loaded"
        );
        Ok(running)
    }

    /// Fresh tool lists from every live, initialized server.
    ///
    /// Servers that are not serving, or whose `tools/list` fails, are
    /// omitted rather than reported as errors.
    pub async fn get_all_tools(&self) -> BTreeMap<String, Vec<McpToolInfo>> {
        let mut all_tools = BTreeMap::new();
        for (name, client) in self.snapshot().await {
            if !self.is_serving(&client).await {
                continue;
            }
            match client.list_tools().await {
                Ok(tools) => {
                    all_tools.insert(name, tools);
                }
                Err(e) => {
                    tracing::warn!(server = %name, "Omitting MCP server from tool list: {e}");
                }
            }
        }
        all_tools
    }

    /// Route a tool call to the named server.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, McpError> {
        let client = self
            .client(server_name)
            .await
            .ok_or_else(|| McpError::ServerNotFound {
                name: server_name.to_string(),
            })?;
        client.call_tool(tool_name, arguments).await
    }

    /// One entry per configured server, whether or not it was ever started.
    pub async fn get_server_status(&self) -> BTreeMap<String, ServerStatus> {
        let config = self.loaded.lock().await.config.clone();
        let enablement = self.enablement.load();

        let mut statuses = BTreeMap::new();
        for (name, server) in &config.servers {
            let enabled = enablement.is_enabled(name);
            let status = match self.client(name).await {
                None => ServerStatus::not_running(server, enabled),
                Some(client) => self.live_status(&client, server, enabled).await,
            };
            statuses.insert(name.clone(), status);
        }
        statuses
    }

    /// Start one server. Already running is a no-op success.
    ///
    /// The configuration is re-read first. The enablement state is not
    /// consulted: an explicit start overrides it. A statically disabled
    /// server is refused.
    pub async fn start_server(&self, name: &str) -> Result<(), McpError> {
        let _control = self.control.lock().await;
        self.start_locked(name).await
    }

    /// Stop one server. Not running is a no-op success.
    pub async fn stop_server(&self, name: &str) -> Result<(), McpError> {
        let _control = self.control.lock().await;
        self.remove_and_close(name).await;
        Ok(())
    }

    /// Stop, then start, one server with a freshly read configuration.
    pub async fn restart_server(&self, name: &str) -> Result<(), McpError> {
        let _control = self.control.lock().await;
        self.remove_and_close(name).await;
        self.start_locked(name).await
    }

    /// Shut down all servers and clear the registry.
    pub async fn close_all(&self) {
        let _control = self.control.lock().await;
        let clients: Vec<Arc<McpClient>> = self
            .clients
            .write()
            .await
            .drain()
            .map(|(_, client)| client)
            .collect();
        for client in clients {
            client.close().await;
        }
    }

    /// Remember `path` as the configuration file without reading it.
    ///
    /// Later `start_server`/`restart_server` calls re-read it, so a file
    /// created after startup is still picked up.
    pub async fn set_config_path(&self, path: &Path) {
        self.loaded.lock().await.path = Some(path.to_path_buf());
    }

    /// The client for a started server.
    pub async fn client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.clients.read().await.get(name).cloned()
    }

    /// Names of servers with a registered client, sorted.
    pub async fn running_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all configured servers, sorted.
    pub async fn configured_servers(&self) -> Vec<String> {
        self.loaded
            .lock()
            .await
            .config
            .servers
            .keys()
            .cloned()
            .collect()
    }

    /// Number of started servers.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn start_locked(&self, name: &str) -> Result<(), McpError> {
        let config = self.refresh_config().await?;
        let server = config
            .servers
            .get(name)
            .ok_or_else(|| McpError::ServerNotFound {
                name: name.to_string(),
            })?;
        if server.disabled {
            return Err(McpError::Disabled {
                name: name.to_string(),
            });
        }

        if let Some(client) = self.client(name).await {
            if self.is_serving(&client).await {
                tracing::debug!(server = %name, "MCP server already running");
                return Ok(());
            }
            self.remove_and_close(name).await;
        }

        self.launch(name, server).await.map(|_| ())
    }

    /// Start and initialize a client, registering it only on success.
    async fn launch(
        &self,
        name: &str,
        server: &McpServerConfig,
    ) -> Result<Arc<McpClient>, McpError> {
        let client = Arc::new(McpClient::new(name, server.clone(), self.settings.timeouts));
        client.start().await?;
        if let Err(e) = client.initialize(&self.settings.client_info).await {
            client.close().await;
            return Err(e);
        }
        self.clients
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    async fn remove_and_close(&self, name: &str) {
        let removed = self.clients.write().await.remove(name);
        if let Some(client) = removed {
            client.close().await;
        }
    }

    async fn is_serving(&self, client: &McpClient) -> bool {
        client.is_initialized().await && client.is_alive().await
    }

    /// Re-read the configuration file, if one was loaded.
    async fn refresh_config(&self) -> Result<McpConfig, McpError> {
        let path = self.loaded.lock().await.path.clone();
        match path {
            Some(path) => {
                let config = McpConfig::load(&path)?;
                self.apply_config(None, config.clone()).await;
                Ok(config)
            }
            None => Ok(self.loaded.lock().await.config.clone()),
        }
    }

    /// Store `config` and stop clients whose server is no longer configured.
    async fn apply_config(&self, path: Option<PathBuf>, config: McpConfig) {
        let stale: Vec<Arc<McpClient>> = {
            let mut clients = self.clients.write().await;
            let names: Vec<String> = clients
                .keys()
                .filter(|name| !config.servers.contains_key(name.as_str()))
                .cloned()
                .collect();
            names
                .iter()
                .filter_map(|name| clients.remove(name))
                .collect()
        };

        {
            let mut loaded = self.loaded.lock().await;
            if path.is_some() {
                loaded.path = path;
            }
            loaded.config = config;
        }

        for client in stale {
            tracing::info!(
                server = %client.server_name(),
                "MCP server removed from config, stopping"
            );
            client.close().await;
        }
    }

    async fn snapshot(&self) -> Vec<(String, Arc<McpClient>)> {
        let mut clients: Vec<(String, Arc<McpClient>)> = self
            .clients
            .read()
            .await
            .iter()
            .map(|(name, client)| (name.clone(), Arc::clone(client)))
            .collect();
        clients.sort_by(|a, b| a.0.cmp(&b.0));
        clients
    }

    async fn live_status(
        &self,
        client: &McpClient,
        server: &McpServerConfig,
        enabled: bool,
    ) -> ServerStatus {
        let mut status = ServerStatus::from_config(server, enabled, ServerClassification::Running);
        status.server_info = client.server_info().await;

        if !client.is_alive().await {
            status.classification = ServerClassification::Error("process exited".to_string());
            return status;
        }
        status.running = true;
        if !client.is_initialized().await {
            status.classification = ServerClassification::Error("not initialized".to_string());
            return status;
        }

        status.classification = match client.list_tools().await {
            Ok(tools) if tools.is_empty() => ServerClassification::NoTools,
            Ok(tools) => {
                status.tools = tools;
                ServerClassification::Running
            }
            Err(e) => ServerClassification::Error(e.to_string()),
        };
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ServerEnablement;
    use crate::testing::{cat_config, mock_server_config};
    use std::io::Write;
    use std::time::Duration;

    fn settings() -> ManagerSettings {
        ManagerSettings {
            timeouts: ClientTimeouts {
                request: Duration::from_secs(5),
                tool_call: Duration::from_millis(300),
                shutdown_grace: Duration::from_secs(1),
            },
            client_info: ClientInfo::default(),
        }
    }

    fn manager(state: ServerEnablement) -> McpManager {
        McpManager::new(settings(), Arc::new(state))
    }

    fn entry(config: McpServerConfig) -> serde_json::Value {
        serde_json::to_value(config).unwrap()
    }

    fn config_file(servers: serde_json::Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let doc = serde_json::json!({ "mcpServers": servers });
        file.write_all(doc.to_string().as_bytes()).unwrap();
        file
    }

    fn rewrite(file: &tempfile::NamedTempFile, servers: serde_json::Value) {
        let doc = serde_json::json!({ "mcpServers": servers });
        std::fs::write(file.path(), doc.to_string()).unwrap();
    }

    #[tokio::test]
    async fn empty_config_starts_no_servers() {
        let file = config_file(serde_json::json!({}));
        let manager = manager(ServerEnablement::new());
        assert_eq!(manager.load_from_config(file.path()).await.unwrap(), 0);
        assert!(manager.get_all_tools().await.is_empty());
        assert!(manager.get_server_status().await.is_empty());
        manager.close_all().await;
    }

    #[tokio::test]
    async fn missing_config_file_is_an_error() {
        let manager = manager(ServerEnablement::new());
        let result = manager
            .load_from_config(Path::new("/nonexistent/tether/mcp.json"))
            .await;
        assert!(matches!(result, Err(McpError::Config { .. })));
    }

    #[tokio::test]
    async fn echo_server_scenario() {
        let file = config_file(serde_json::json!({
            "echo": {"command": "cat", "args": []}
        }));
        let state: ServerEnablement = [("echo".to_string(), true)].into_iter().collect();
        let manager = manager(state);

        assert_eq!(manager.load_from_config(file.path()).await.unwrap(), 1);
        let tools = manager.get_all_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools["echo"], Vec::<McpToolInfo>::new());
        manager.close_all().await;
    }

    #[tokio::test]
    async fn failed_server_is_skipped() {
        let file = config_file(serde_json::json!({
            "bad": {"command": "nonexistent_command_xyz123"},
            "good": entry(mock_server_config()),
        }));
        let manager = manager(ServerEnablement::new());
        assert_eq!(manager.load_from_config(file.path()).await.unwrap(), 1);
        assert_eq!(manager.running_servers().await, vec!["good".to_string()]);

        let status = manager.get_server_status().await;
        assert_eq!(status["bad"].classification, ServerClassification::Stopped);
        assert_eq!(status["good"].classification, ServerClassification::Running);
        assert_eq!(status["good"].tools.len(), 2);
        manager.close_all().await;
    }

    #[tokio::test]
    async fn static_and_state_disabled_servers_are_not_loaded() {
        let mut disabled = cat_config();
        disabled.disabled = true;
        let file = config_file(serde_json::json!({
            "static_off": entry(disabled),
            "state_off": entry(cat_config()),
            "on": entry(cat_config()),
        }));
        let state: ServerEnablement = [("state_off".to_string(), false)].into_iter().collect();
        let manager = manager(state);

        assert_eq!(manager.load_from_config(file.path()).await.unwrap(), 1);
        let status = manager.get_server_status().await;
        assert_eq!(status.len(), 3);
        assert_eq!(status["static_off"].classification, ServerClassification::Disabled);
        assert_eq!(status["state_off"].classification, ServerClassification::Disabled);
        assert!(!status["state_off"].enabled);
        assert_eq!(status["on"].classification, ServerClassification::NoTools);
        assert!(status["on"].running);
        manager.close_all().await;
    }

    #[tokio::test]
    async fn call_tool_on_missing_server() {
        let file = config_file(serde_json::json!({ "mock": entry(mock_server_config()) }));
        let manager = manager(ServerEnablement::new());
        manager.load_from_config(file.path()).await.unwrap();

        match manager
            .call_tool("missing-server", "x", serde_json::json!({}))
            .await
        {
            Err(McpError::ServerNotFound { name }) => assert_eq!(name, "missing-server"),
            other => panic!("Expected ServerNotFound, got: {other:?}"),
        }
        // The live client is untouched.
        assert!(
            manager
                .call_tool("mock", "echo", serde_json::json!({}))
                .await
                .is_ok()
        );
        manager.close_all().await;
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let file = config_file(serde_json::json!({ "mock": entry(mock_server_config()) }));
        let state: ServerEnablement = [("mock".to_string(), false)].into_iter().collect();
        let manager = manager(state);
        assert_eq!(manager.load_from_config(file.path()).await.unwrap(), 0);

        // Manual start overrides the enablement state.
        manager.start_server("mock").await.unwrap();
        let first = manager.client("mock").await.unwrap();
        manager.start_server("mock").await.unwrap();
        let second = manager.client("mock").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.client_count().await, 1);

        manager.stop_server("mock").await.unwrap();
        manager.stop_server("mock").await.unwrap();
        assert_eq!(manager.client_count().await, 0);
        assert!(!first.is_alive().await);
        assert_eq!(
            manager.get_server_status().await["mock"].classification,
            ServerClassification::Disabled
        );
    }

    #[tokio::test]
    async fn restart_replaces_the_client() {
        let file = config_file(serde_json::json!({ "mock": entry(mock_server_config()) }));
        let manager = manager(ServerEnablement::new());
        manager.load_from_config(file.path()).await.unwrap();

        let before = manager.client("mock").await.unwrap();
        manager.restart_server("mock").await.unwrap();
        let after = manager.client("mock").await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(!before.is_alive().await);
        assert!(after.is_initialized().await);
        manager.close_all().await;
    }

    #[tokio::test]
    async fn start_rejects_unknown_and_disabled_servers() {
        let mut disabled = cat_config();
        disabled.disabled = true;
        let file = config_file(serde_json::json!({ "off": entry(disabled) }));
        let manager = manager(ServerEnablement::new());
        manager.load_from_config(file.path()).await.unwrap();

        assert!(matches!(
            manager.start_server("nope").await,
            Err(McpError::ServerNotFound { .. })
        ));
        assert!(matches!(
            manager.start_server("off").await,
            Err(McpError::Disabled { .. })
        ));
        assert_eq!(manager.client_count().await, 0);
    }

    #[tokio::test]
    async fn start_picks_up_newly_configured_server() {
        let file = config_file(serde_json::json!({}));
        let manager = manager(ServerEnablement::new());
        manager.load_from_config(file.path()).await.unwrap();

        rewrite(&file, serde_json::json!({ "late": entry(cat_config()) }));
        manager.start_server("late").await.unwrap();
        assert_eq!(manager.running_servers().await, vec!["late".to_string()]);
        manager.close_all().await;
    }

    #[tokio::test]
    async fn start_reads_config_created_after_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        let manager = manager(ServerEnablement::new());
        manager.set_config_path(&path).await;

        assert!(matches!(
            manager.start_server("late").await,
            Err(McpError::Config { .. })
        ));

        let doc = serde_json::json!({ "mcpServers": { "late": entry(cat_config()) } });
        std::fs::write(&path, doc.to_string()).unwrap();
        manager.start_server("late").await.unwrap();
        assert_eq!(manager.configured_servers().await, vec!["late".to_string()]);
        assert_eq!(manager.running_servers().await, vec!["late".to_string()]);
        manager.close_all().await;
    }

    #[tokio::test]
    async fn reload_stops_servers_removed_from_config() {
        let file = config_file(serde_json::json!({
            "a": entry(cat_config()),
            "b": entry(cat_config()),
        }));
        let manager = manager(ServerEnablement::new());
        assert_eq!(manager.load_from_config(file.path()).await.unwrap(), 2);
        let a = manager.client("a").await.unwrap();

        rewrite(&file, serde_json::json!({ "a": entry(cat_config()) }));
        assert_eq!(manager.load_from_config(file.path()).await.unwrap(), 1);
        assert_eq!(manager.running_servers().await, vec!["a".to_string()]);
        assert_eq!(manager.configured_servers().await, vec!["a".to_string()]);
        // Unchanged servers keep their client.
        assert!(Arc::ptr_eq(&a, &manager.client("a").await.unwrap()));
        manager.close_all().await;
    }

    #[tokio::test]
    async fn dead_server_is_reported_and_omitted() {
        let script = "read line; printf '{\"jsonrpc\":\"2.0\",\"id\":\"%s\",\"result\":{}}\\n' \"$(printf '%s' \"$line\" | sed -n 's/^{\"jsonrpc\":\"2.0\",\"id\":\"\\([^\"]*\\)\".*/\\1/p')\"; read line; exit 0";
        let file = config_file(serde_json::json!({
            "flaky": {"command": "sh", "args": ["-c", script]}
        }));
        let manager = manager(ServerEnablement::new());
        assert_eq!(manager.load_from_config(file.path()).await.unwrap(), 1);

        // Wait for the process to exit after the initialized notification.
        let client = manager.client("flaky").await.unwrap();
        for _ in 0..50 {
            if !client.is_alive().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(manager.get_all_tools().await.is_empty());
        let status = manager.get_server_status().await;
        assert!(!status["flaky"].running);
        assert!(matches!(
            status["flaky"].classification,
            ServerClassification::Error(_)
        ));

        // An explicit start replaces the dead client.
        rewrite(&file, serde_json::json!({ "flaky": entry(cat_config()) }));
        manager.start_server("flaky").await.unwrap();
        assert!(manager.client("flaky").await.unwrap().is_alive().await);
        manager.close_all().await;
    }

    #[tokio::test]
    async fn close_all_clears_registry() {
        let file = config_file(serde_json::json!({
            "a": entry(cat_config()),
            "b": entry(mock_server_config()),
        }));
        let manager = manager(ServerEnablement::new());
        assert_eq!(manager.load_from_config(file.path()).await.unwrap(), 2);
        let b = manager.client("b").await.unwrap();

        manager.close_all().await;
        assert_eq!(manager.client_count().await, 0);
        assert!(!b.is_alive().await);
        let status = manager.get_server_status().await;
        assert_eq!(status.len(), 2);
        assert!(status.values().all(|s| !s.running));
    }
}
