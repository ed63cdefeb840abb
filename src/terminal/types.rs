use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle phase of the interactive session slot.
///
/// A crash leaves `Active` for `Idle` directly and is told apart by the
/// `exit` event.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalPhase {
    #[default]
    Idle,
    Starting,
    Active,
    Stopping,
}

/// How the interactive CLI is launched
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandMode {
    /// Interactive permission prompts
    #[default]
    Standard,
    /// Launch with `--dangerously-skip-permissions`
    SkipPermissions,
}

/// Request to open the interactive session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTerminalRequest {
    pub workstream_id: String,
    /// Resume this conversation; a fresh id is generated when absent
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub command_mode: CommandMode,
}

/// Snapshot of the interactive session slot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TerminalState {
    pub phase: TerminalPhase,
    pub conversation_id: Option<String>,
    pub workstream_id: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub command_mode: Option<CommandMode>,
    pub started_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
}

impl TerminalState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.phase == TerminalPhase::Idle
    }
}

/// Events published by the interactive session manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalEvent {
    Started {
        state: TerminalState,
    },
    /// Raw pty bytes, in production order
    Output {
        conversation_id: String,
        workstream_id: String,
        #[serde(serialize_with = "encode_bytes", deserialize_with = "decode_bytes")]
        data: Vec<u8>,
    },
    /// The process exited after a stop request
    Stopped {
        conversation_id: String,
        workstream_id: String,
        exit_code: Option<u32>,
        signal: Option<String>,
        state: TerminalState,
    },
    /// The process exited on its own
    Exit {
        conversation_id: String,
        workstream_id: String,
        exit_code: Option<u32>,
        signal: Option<String>,
        state: TerminalState,
    },
    Error {
        conversation_id: Option<String>,
        workstream_id: Option<String>,
        message: String,
        /// False for best-effort side work such as metadata sync
        fatal: bool,
    },
}

fn encode_bytes<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn decode_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded)
        .map_err(serde::de::Error::custom)
}
