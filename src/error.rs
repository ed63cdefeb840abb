//! Error type shared by the streaming and terminal engines

use thiserror::Error;

/// Errors surfaced by agent operations.
///
/// Configuration errors (`BinaryNotFound`, `InvalidPermissionMode`, `Config`)
/// are raised before any process is spawned and are never retried.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Claude CLI not found. Install it or set CLAUDE_CLI_PATH to the executable.")]
    BinaryNotFound,

    #[error("Invalid permission mode '{0}'. Expected one of: acceptEdits, bypassPermissions, default, delegate, dontAsk, plan")]
    InvalidPermissionMode(String),

    #[error("Failed to spawn Claude CLI: {0}")]
    Spawn(String),

    #[error("Terminal error: {0}")]
    Pty(String),

    #[error("Another terminal session is active for conversation {conversation_id}. Stop it before starting a new one.")]
    SessionActive { conversation_id: String },

    #[error("Conversation {conversation_id} is owned by the active terminal session")]
    ConversationBusy { conversation_id: String },

    #[error("No terminal session is active")]
    NoActiveSession,

    #[error("Stream ended before producing a result")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Metadata sync failed: {0}")]
    Metadata(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<AgentError> for String {
    fn from(e: AgentError) -> Self {
        e.to_string()
    }
}
