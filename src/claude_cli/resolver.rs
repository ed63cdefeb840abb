//! Validated, cached resolution of the Claude CLI executable

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use super::config::{candidate_paths, is_existing_file};
use crate::config::EngineConfig;

/// Interval between exit checks while a version probe runs
const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Resolves the Claude CLI and remembers the last validated path.
///
/// The cached path is revalidated on every call; once it stops answering
/// `--version` the full candidate list is scanned again.
pub struct BinaryResolver {
    config: EngineConfig,
    cached: Mutex<Option<PathBuf>>,
}

impl BinaryResolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            cached: Mutex::new(None),
        }
    }

    /// Return the first candidate that answers `--version` with exit code 0.
    ///
    /// `None` is a configuration problem for the user to fix, not something
    /// to retry.
    pub fn resolve(&self, search_path: &str) -> Option<PathBuf> {
        let timeout = self.config.probe_timeout();
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(path) = cached.as_ref() {
            if probe(path, search_path, timeout) {
                return Some(path.clone());
            }
            log::warn!("Cached Claude CLI at {path:?} failed revalidation");
            *cached = None;
        }

        for candidate in candidate_paths(&self.config, search_path) {
            if !is_existing_file(&candidate) {
                continue;
            }
            log::trace!("Probing Claude CLI candidate {candidate:?}");
            if probe(&candidate, search_path, timeout) {
                log::debug!("Resolved Claude CLI at {candidate:?}");
                *cached = Some(candidate.clone());
                return Some(candidate);
            }
        }

        log::error!("No working Claude CLI found");
        None
    }

    /// The last validated path, without probing
    pub fn cached(&self) -> Option<PathBuf> {
        self.cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear_cache(&self) {
        *self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

/// Run `<path> --version` and require a zero exit within `timeout`
pub fn probe(path: &Path, search_path: &str, timeout: Duration) -> bool {
    let mut cmd = Command::new(path);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if !search_path.is_empty() {
        cmd.env("PATH", search_path);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            log::trace!("Probe spawn failed for {path:?}: {e}");
            return false;
        }
    };

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return status.success(),
            Ok(None) if Instant::now() >= deadline => {
                log::warn!("Probe timed out for {path:?}");
                let _ = child.kill();
                let _ = child.wait();
                return false;
            }
            Ok(None) => thread::sleep(PROBE_POLL_INTERVAL),
            Err(e) => {
                log::trace!("Probe wait failed for {path:?}: {e}");
                return false;
            }
        }
    }
}
