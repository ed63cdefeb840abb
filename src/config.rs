//! Engine configuration
//!
//! Loaded from `engine.json` in the platform config directory. Every field has
//! a default so a partial (or missing) file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Directory name under the platform config dir
pub const CONFIG_DIR_NAME: &str = "workstreams";

/// File name of the engine configuration
pub const CONFIG_FILE_NAME: &str = "engine.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Executable name searched for in well-known dirs and PATH
    pub binary_name: String,
    /// Environment variables holding an explicit executable path, in priority order
    pub env_overrides: Vec<String>,
    /// Installation directories checked before PATH (`~` is expanded)
    pub well_known_dirs: Vec<String>,
    /// PATH used for resolution and handed to spawned processes.
    /// Falls back to the process PATH when unset.
    pub search_path: Option<String>,
    /// Timeout for the `--version` validation probe
    pub probe_timeout_ms: u64,
    pub terminal_cols: u16,
    pub terminal_rows: u16,
    pub min_cols: u16,
    pub min_rows: u16,
    /// Extra environment for interactive sessions
    pub terminal_env: Vec<(String, String)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary_name: crate::claude_cli::CLI_BINARY_NAME.to_string(),
            env_overrides: vec!["CLAUDE_CLI_PATH".to_string(), "CLAUDE_PATH".to_string()],
            well_known_dirs: [
                "~/.claude/local",
                "~/.local/bin",
                "~/.npm-global/bin",
                "~/.bun/bin",
                "/opt/homebrew/bin",
                "/usr/local/bin",
                "/usr/bin",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            search_path: None,
            probe_timeout_ms: 6_000,
            terminal_cols: 120,
            terminal_rows: 32,
            min_cols: 20,
            min_rows: 5,
            terminal_env: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Default location: `<config dir>/workstreams/engine.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load configuration from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        if !path.exists() {
            log::trace!("No engine config at {path:?}, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| AgentError::Config(format!("{}: {e}", path.display())))
    }

    /// Persist configuration to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), AgentError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AgentError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// The PATH to search and to hand to child processes
    pub fn effective_search_path(&self) -> String {
        self.search_path
            .clone()
            .or_else(|| std::env::var("PATH").ok())
            .unwrap_or_default()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Well-known dirs with a leading `~` expanded to the home directory
    pub fn expanded_well_known_dirs(&self) -> Vec<PathBuf> {
        self.well_known_dirs
            .iter()
            .filter_map(|dir| expand_home(dir))
            .collect()
    }
}

fn expand_home(dir: &str) -> Option<PathBuf> {
    if dir == "~" {
        return dirs::home_dir();
    }
    match dir.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(dir)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.probe_timeout(), Duration::from_secs(6));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"binaryName": "claude-dev", "terminalCols": 80}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.binary_name, "claude-dev");
        assert_eq!(config.terminal_cols, 80);
        assert_eq!(config.terminal_rows, 32);
        assert_eq!(config.env_overrides, EngineConfig::default().env_overrides);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("engine.json");
        let config = EngineConfig {
            search_path: Some("/opt/bin".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.effective_search_path(), "/opt/bin");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/usr/bin"), Some(PathBuf::from("/usr/bin")));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.local/bin"), Some(home.join(".local/bin")));
        }
    }
}
