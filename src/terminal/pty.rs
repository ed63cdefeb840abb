use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::Path;

use super::types::CommandMode;
use crate::error::AgentError;

/// Handles of a freshly spawned pty process
pub struct SpawnedPty {
    pub master: Box<dyn MasterPty + Send>,
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub child: Box<dyn Child + Send + Sync>,
}

/// Argument vector for an interactive session
pub fn build_terminal_args(conversation_id: &str, resume: bool, mode: CommandMode) -> Vec<String> {
    let mut args = if resume {
        vec!["--resume".to_string(), conversation_id.to_string()]
    } else {
        vec!["--session-id".to_string(), conversation_id.to_string()]
    };
    if mode == CommandMode::SkipPermissions {
        args.push("--dangerously-skip-permissions".to_string());
    }
    args
}

pub fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Spawn the CLI attached to a new pseudo-terminal
pub fn spawn_pty(
    cli_path: &Path,
    args: &[String],
    working_dir: &Path,
    cols: u16,
    rows: u16,
    search_path: &str,
    extra_env: &[(String, String)],
) -> Result<SpawnedPty, AgentError> {
    log::trace!("Spawning interactive Claude CLI at {working_dir:?} ({cols}x{rows})");
    log::debug!("Interactive command: {} {}", cli_path.display(), args.join(" "));

    let pty_system = native_pty_system();

    let pair = pty_system
        .openpty(pty_size(cols, rows))
        .map_err(|e| AgentError::Pty(format!("Failed to open PTY: {e}")))?;

    let mut cmd = CommandBuilder::new(cli_path);
    cmd.args(args);
    cmd.cwd(working_dir);
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    cmd.env_remove("CLAUDECODE");
    if !search_path.is_empty() {
        cmd.env("PATH", search_path);
    }
    for (key, value) in extra_env {
        cmd.env(key, value);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| AgentError::Spawn(format!("{}: {e}", cli_path.display())))?;
    // The parent's slave handle must go, or the master never sees EOF
    drop(pair.slave);

    log::trace!("Spawned interactive process {:?}", child.process_id());

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| AgentError::Pty(format!("Failed to clone reader: {e}")))?;

    // The writer can only be taken once and is stored with the session
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| AgentError::Pty(format!("Failed to take writer: {e}")))?;

    Ok(SpawnedPty {
        master: pair.master,
        reader,
        writer,
        child,
    })
}
