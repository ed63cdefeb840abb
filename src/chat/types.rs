//! Types for one-shot agent exchanges

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

// ============================================================================
// Request
// ============================================================================

/// Values accepted by `--permission-mode`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    AcceptEdits,
    BypassPermissions,
    Default,
    Delegate,
    DontAsk,
    Plan,
}

impl PermissionMode {
    /// The spelling the CLI expects
    pub fn as_cli_arg(&self) -> &'static str {
        match self {
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Default => "default",
            PermissionMode::Delegate => "delegate",
            PermissionMode::DontAsk => "dontAsk",
            PermissionMode::Plan => "plan",
        }
    }
}

impl FromStr for PermissionMode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acceptEdits" => Ok(PermissionMode::AcceptEdits),
            "bypassPermissions" => Ok(PermissionMode::BypassPermissions),
            "default" => Ok(PermissionMode::Default),
            "delegate" => Ok(PermissionMode::Delegate),
            "dontAsk" => Ok(PermissionMode::DontAsk),
            "plan" => Ok(PermissionMode::Plan),
            other => Err(AgentError::InvalidPermissionMode(other.to_string())),
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_cli_arg())
    }
}

/// An outbound ask to the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamRequest {
    pub message: String,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub resume_session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default)]
    pub skip_permissions: bool,
}

impl StreamRequest {
    pub fn new(message: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            message: message.into(),
            working_dir: working_dir.into(),
            resume_session_id: None,
            model: None,
            permission_mode: None,
            skip_permissions: false,
        }
    }
}

// ============================================================================
// Decoded facts
// ============================================================================

/// A tool invocation found in an assistant turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseFact {
    pub id: String,
    pub name: String,
    pub input: Value,
    /// Set for tool calls made by a sub-agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

/// Output of a tool, correlated to its invocation by `tool_use_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultFact {
    pub tool_use_id: String,
    pub output: String,
    pub is_error: bool,
    pub interrupted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionOption {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A question the agent wants the user to answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionFact {
    pub tool_use_id: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    pub options: Vec<QuestionOption>,
    pub multi_select: bool,
}

/// A single operation the agent was not allowed to perform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionDenialFact {
    pub tool_name: String,
    pub tool_use_id: String,
    pub tool_input: Value,
}

/// The agent's terminal `result` object
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultFact {
    pub result: Option<String>,
    /// Agent-reported error, forced on when any permission was denied
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permission_denials: Vec<PermissionDenialFact>,
}

/// One fact extracted from a protocol line
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    Init(Value),
    Token(String),
    Assistant(String),
    ToolUse(ToolUseFact),
    ToolResult(ToolResultFact),
    Question(QuestionFact),
    Permission(Vec<PermissionDenialFact>),
    Result(ResultFact),
}

// ============================================================================
// Events
// ============================================================================

/// Kind-specific part of a [`StreamEvent`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamPayload {
    Init { message: Value },
    Token { text: String },
    Assistant { text: String },
    ToolUse(ToolUseFact),
    ToolResult(ToolResultFact),
    Question(QuestionFact),
    Permission {
        denials: Vec<PermissionDenialFact>,
        summary: String,
    },
    Result(ResultFact),
    Error { message: String },
    Done { exit_code: Option<i32>, is_error: bool },
}

impl From<Fact> for StreamPayload {
    fn from(fact: Fact) -> Self {
        match fact {
            Fact::Init(message) => StreamPayload::Init { message },
            Fact::Token(text) => StreamPayload::Token { text },
            Fact::Assistant(text) => StreamPayload::Assistant { text },
            Fact::ToolUse(tool) => StreamPayload::ToolUse(tool),
            Fact::ToolResult(result) => StreamPayload::ToolResult(result),
            Fact::Question(question) => StreamPayload::Question(question),
            Fact::Permission(denials) => {
                let summary = super::decoder::summarize_denials(&denials);
                StreamPayload::Permission { denials, summary }
            }
            Fact::Result(result) => StreamPayload::Result(result),
        }
    }
}

/// One unit of the live feed of a one-shot exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub stream_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Latest session id reported by the agent, if any yet
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub payload: StreamPayload,
}

impl StreamEvent {
    pub fn new(stream_id: &str, session_id: Option<&str>, payload: StreamPayload) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            session_id: session_id.map(str::to_string),
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            StreamPayload::Init { .. } => "init",
            StreamPayload::Token { .. } => "token",
            StreamPayload::Assistant { .. } => "assistant",
            StreamPayload::ToolUse(_) => "tool_use",
            StreamPayload::ToolResult(_) => "tool_result",
            StreamPayload::Question(_) => "question",
            StreamPayload::Permission { .. } => "permission",
            StreamPayload::Result(_) => "result",
            StreamPayload::Error { .. } => "error",
            StreamPayload::Done { .. } => "done",
        }
    }
}

/// Terminal outcome of a one-shot exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendResult {
    pub stream_id: String,
    /// Session the agent ended on; may differ from the one requested
    pub session_id: Option<String>,
    pub assistant_text: String,
    pub result_text: String,
    pub is_error: bool,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_mode_round_trips_cli_spelling() {
        for spelling in [
            "acceptEdits",
            "bypassPermissions",
            "default",
            "delegate",
            "dontAsk",
            "plan",
        ] {
            let mode: PermissionMode = spelling.parse().unwrap();
            assert_eq!(mode.as_cli_arg(), spelling);
        }
    }

    #[test]
    fn test_unknown_permission_mode_is_rejected() {
        let err = "yolo".parse::<PermissionMode>().unwrap_err();
        assert!(matches!(err, AgentError::InvalidPermissionMode(ref m) if m == "yolo"));
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let event = StreamEvent::new(
            "stream-1",
            Some("sess"),
            StreamPayload::Token {
                text: "Hi".to_string(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "token");
        assert_eq!(json["text"], "Hi");
        assert_eq!(json["stream_id"], "stream-1");
        assert_eq!(json["session_id"], "sess");
        assert_eq!(event.kind(), "token");
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: StreamRequest = serde_json::from_str(
            r#"{"message": "hi", "working_dir": "/tmp", "permission_mode": "plan"}"#,
        )
        .unwrap();
        assert_eq!(request.permission_mode, Some(PermissionMode::Plan));
        assert!(request.resume_session_id.is_none());
        assert!(!request.skip_permissions);
    }
}
