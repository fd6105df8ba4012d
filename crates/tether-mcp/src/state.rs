//! Persisted per-server enable/disable state.
//!
//! The state is owned by an external collaborator (typically a settings UI)
//! and is read-only here. It is independent of the static `disabled` flag in
//! the server configuration; a server starts automatically only when both
//! allow it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Mapping from server name to enabled flag. Absent servers are enabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerEnablement {
    servers: HashMap<String, bool>,
}

impl ServerEnablement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` may be started automatically.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.servers.get(name).copied().unwrap_or(true)
    }

    /// Read the state from a JSON file. A missing or malformed file yields
    /// the empty (all-enabled) state.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

impl FromIterator<(String, bool)> for ServerEnablement {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self {
            servers: iter.into_iter().collect(),
        }
    }
}

/// Source of the current enablement state, consulted on every load.
pub trait EnablementSource: Send + Sync {
    fn load(&self) -> ServerEnablement;
}

/// A fixed, in-memory state.
impl EnablementSource for ServerEnablement {
    fn load(&self) -> ServerEnablement {
        self.clone()
    }
}

/// State read from a JSON file each time it is consulted.
#[derive(Debug, Clone)]
pub struct FileEnablement {
    path: PathBuf,
}

impl FileEnablement {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EnablementSource for FileEnablement {
    fn load(&self) -> ServerEnablement {
        ServerEnablement::load(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn absent_servers_default_to_enabled() {
        let state = ServerEnablement::new();
        assert!(state.is_enabled("anything"));
    }

    #[test]
    fn explicit_flags_win() {
        let state: ServerEnablement = [("on".to_string(), true), ("off".to_string(), false)]
            .into_iter()
            .collect();
        assert!(state.is_enabled("on"));
        assert!(!state.is_enabled("off"));
    }

    #[test]
    fn load_flat_json_map() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"echo": true, "github": false}}"#).unwrap();
        let state = FileEnablement::new(file.path()).load();
        assert!(state.is_enabled("echo"));
        assert!(!state.is_enabled("github"));
    }

    #[test]
    fn malformed_file_is_treated_as_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[not a map").unwrap();
        let state = ServerEnablement::load(file.path());
        assert_eq!(state, ServerEnablement::default());
    }

    #[test]
    fn missing_file_is_treated_as_empty() {
        let state = ServerEnablement::load(Path::new("/nonexistent/tether/mcp_state.json"));
        assert!(state.is_enabled("x"));
    }
}
