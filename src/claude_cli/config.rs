//! Candidate locations for the Claude CLI binary

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;

/// Name of the Claude CLI binary
pub const CLI_BINARY_NAME: &str = "claude";

/// Build the ordered, de-duplicated list of candidate executables.
///
/// Priority: environment overrides, then well-known installation
/// directories, then every match in `search_path`.
pub fn candidate_paths(config: &EngineConfig, search_path: &str) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    for var in &config.env_overrides {
        if let Ok(value) = std::env::var(var) {
            let value = value.trim();
            if !value.is_empty() {
                candidates.push(PathBuf::from(value));
            }
        }
    }

    for dir in config.expanded_well_known_dirs() {
        candidates.push(dir.join(&config.binary_name));
    }

    candidates.extend(path_matches(&config.binary_name, search_path));

    dedup_preserving_order(candidates)
}

/// Every executable named `binary_name` along `search_path`, in PATH order
fn path_matches(binary_name: &str, search_path: &str) -> Vec<PathBuf> {
    if search_path.is_empty() {
        return Vec::new();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match which::which_in_all(binary_name, Some(search_path), cwd) {
        Ok(found) => found.collect(),
        Err(e) => {
            log::trace!("No {binary_name} on search path: {e}");
            Vec::new()
        }
    }
}

fn dedup_preserving_order(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    paths
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Whether a candidate exists as a regular file (symlinks followed)
pub fn is_existing_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}
