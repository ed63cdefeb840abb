//! Desktop command bridge
//!
//! `#[tauri::command]` wrappers over [`AgentService`]. One-shot stream events
//! are emitted as `agent:stream`, interactive session events as
//! `agent:terminal`.

use std::path::PathBuf;
use std::sync::Arc;

use tauri::{AppHandle, Emitter, Manager, State};
use tokio::sync::mpsc;

use crate::chat::{PermissionMode, SendResult, StreamEvent, StreamRequest};
use crate::config::EngineConfig;
use crate::metadata::ChatMetadataStore;
use crate::service::AgentService;
use crate::terminal::{CommandMode, StartTerminalRequest, TerminalEvent, TerminalState};

pub const STREAM_EVENT: &str = "agent:stream";
pub const TERMINAL_EVENT: &str = "agent:terminal";

/// Load the engine configuration, register [`AgentService`] as managed state
/// and start forwarding interactive session events to the webview
pub fn manage_state(app: &AppHandle, metadata: Arc<dyn ChatMetadataStore>) -> Result<(), String> {
    let config = match EngineConfig::default_path() {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<TerminalEvent>();
    app.manage(AgentService::new(config, metadata, tx));

    let app = app.clone();
    tauri::async_runtime::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = app.emit(TERMINAL_EVENT, &event) {
                log::warn!("Failed to emit terminal event: {e}");
            }
        }
    });
    Ok(())
}

/// Stop the interactive session; call from the app's exit handler
pub fn shutdown(app: &AppHandle) {
    if let Some(service) = app.try_state::<AgentService>() {
        service.shutdown();
    }
}

fn forward_stream_events(app: AppHandle, mut rx: mpsc::UnboundedReceiver<StreamEvent>) {
    tauri::async_runtime::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = app.emit(STREAM_EVENT, &event) {
                log::warn!("Failed to emit stream event: {e}");
            }
        }
    });
}

/// Send one message to the agent and wait for the exchange to finish
#[tauri::command]
#[allow(clippy::too_many_arguments)]
pub async fn send_agent_message(
    app: AppHandle,
    service: State<'_, AgentService>,
    workstream_id: String,
    message: String,
    working_dir: PathBuf,
    context_bundle: Option<String>,
    resume_session_id: Option<String>,
    model: Option<String>,
    permission_mode: Option<String>,
    skip_permissions: Option<bool>,
) -> Result<SendResult, String> {
    log::trace!(
        "send_agent_message for workstream {workstream_id} ({} chars)",
        message.len()
    );

    let permission_mode = permission_mode
        .map(|mode| mode.parse::<PermissionMode>())
        .transpose()?;
    let request = StreamRequest {
        resume_session_id,
        model,
        permission_mode,
        skip_permissions: skip_permissions.unwrap_or(false),
        ..StreamRequest::new(message, working_dir)
    };

    let (tx, rx) = mpsc::unbounded_channel();
    forward_stream_events(app, rx);

    Ok(service
        .run_message(&workstream_id, context_bundle.as_deref(), request, tx)
        .await?)
}

/// Request early termination of a one-shot stream
#[tauri::command]
pub async fn cancel_agent_stream(
    service: State<'_, AgentService>,
    stream_id: String,
) -> Result<bool, String> {
    log::trace!("cancel_agent_stream for {stream_id}");
    Ok(service.cancel(&stream_id))
}

/// Get ids of one-shot streams still running
#[tauri::command]
pub async fn get_active_agent_streams(
    service: State<'_, AgentService>,
) -> Result<Vec<String>, String> {
    Ok(service.orchestrator().registry().active_ids())
}

/// Start (or re-attach to) the interactive session
#[tauri::command]
pub async fn start_agent_terminal(
    service: State<'_, AgentService>,
    workstream_id: String,
    working_dir: PathBuf,
    conversation_id: Option<String>,
    skip_permissions: Option<bool>,
) -> Result<TerminalState, String> {
    log::trace!("start_agent_terminal for workstream {workstream_id}");
    let command_mode = if skip_permissions.unwrap_or(false) {
        CommandMode::SkipPermissions
    } else {
        CommandMode::Standard
    };
    Ok(service.start_terminal(StartTerminalRequest {
        workstream_id,
        conversation_id,
        working_dir,
        command_mode,
    })?)
}

/// Stop the interactive session
#[tauri::command]
pub async fn stop_agent_terminal(
    service: State<'_, AgentService>,
) -> Result<TerminalState, String> {
    log::trace!("stop_agent_terminal called");
    Ok(service.stop_terminal())
}

/// Write data to the interactive session (stdin)
#[tauri::command]
pub async fn agent_terminal_write(
    service: State<'_, AgentService>,
    data: String,
) -> Result<(), String> {
    Ok(service.terminals().write(data.as_bytes())?)
}

/// Resize the interactive session
#[tauri::command]
pub async fn agent_terminal_resize(
    service: State<'_, AgentService>,
    cols: f64,
    rows: f64,
) -> Result<(), String> {
    log::trace!("agent_terminal_resize: {cols}x{rows}");
    Ok(service.terminals().resize(cols, rows)?)
}

#[tauri::command]
pub async fn get_agent_terminal_state(
    service: State<'_, AgentService>,
) -> Result<TerminalState, String> {
    Ok(service.terminals().state())
}
