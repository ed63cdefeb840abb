//! Agent streaming and interactive terminal engine for Claude CLI workstreams

pub mod chat;
pub mod claude_cli;
#[cfg(feature = "tauri")]
pub mod commands;
pub mod config;
pub mod error;
pub mod metadata;
mod platform;
pub mod service;
pub mod terminal;

pub use config::EngineConfig;
pub use error::AgentError;
pub use service::AgentService;

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use crate::config::EngineConfig;

    /// Write an executable `/bin/sh` script into `dir`
    pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Configuration that only looks at the search path
    pub fn fake_cli_config() -> EngineConfig {
        EngineConfig {
            env_overrides: Vec::new(),
            well_known_dirs: Vec::new(),
            ..EngineConfig::default()
        }
    }

    /// Install a fake `claude` into `dir` that answers the version probe
    /// and otherwise runs `body`
    pub fn fake_agent(dir: &Path, body: &str) -> EngineConfig {
        write_script(
            dir,
            "claude",
            &format!(
                "if [ \"$1\" = \"--version\" ]; then echo '2.0.0 (Claude Code)'; exit 0; fi\n{body}"
            ),
        );
        EngineConfig {
            search_path: Some(format!("{}:/usr/bin:/bin", dir.display())),
            ..fake_cli_config()
        }
    }
}
