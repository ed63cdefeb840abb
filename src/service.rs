//! Request layer shared by the desktop bridge and embedders
//!
//! Wires the binary resolver, the one-shot orchestrator and the interactive
//! session manager together and enforces the rules that span them.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::chat::{SendResult, StreamEvent, StreamOrchestrator, StreamOutcome, StreamRegistry, StreamRequest};
use crate::claude_cli::BinaryResolver;
use crate::config::EngineConfig;
use crate::error::AgentError;
use crate::metadata::{sync_in_background, ChatMetadataStore};
use crate::terminal::{StartTerminalRequest, TerminalEvent, TerminalManager, TerminalState};

/// Prepend an opaque context bundle to an outbound message
pub fn with_context(message: &str, context_bundle: Option<&str>) -> String {
    match context_bundle.map(str::trim) {
        Some(bundle) if !bundle.is_empty() => format!("{bundle}\n\n{message}"),
        _ => message.to_string(),
    }
}

pub struct AgentService {
    orchestrator: StreamOrchestrator,
    terminals: TerminalManager,
    metadata: Arc<dyn ChatMetadataStore>,
}

impl AgentService {
    /// Build the engines from one configuration.
    ///
    /// Interactive session events are published to `terminal_events`.
    pub fn new(
        config: EngineConfig,
        metadata: Arc<dyn ChatMetadataStore>,
        terminal_events: mpsc::UnboundedSender<TerminalEvent>,
    ) -> Self {
        let resolver = Arc::new(BinaryResolver::new(&config));
        let orchestrator = StreamOrchestrator::new(
            config.clone(),
            resolver.clone(),
            Arc::new(StreamRegistry::new()),
        );
        let terminals = TerminalManager::new(config, resolver, metadata.clone(), terminal_events);
        Self {
            orchestrator,
            terminals,
            metadata,
        }
    }

    pub fn orchestrator(&self) -> &StreamOrchestrator {
        &self.orchestrator
    }

    pub fn terminals(&self) -> &TerminalManager {
        &self.terminals
    }

    /// Start a one-shot exchange for a workstream.
    ///
    /// Refuses to resume a conversation that the interactive session
    /// currently owns.
    pub fn send_message(
        &self,
        context_bundle: Option<&str>,
        mut request: StreamRequest,
        subscriber: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<StreamOutcome, AgentError> {
        if let Some(resume_id) = request.resume_session_id.as_deref() {
            if self.terminals.active_conversation_id().as_deref() == Some(resume_id) {
                return Err(AgentError::ConversationBusy {
                    conversation_id: resume_id.to_string(),
                });
            }
        }

        request.message = with_context(&request.message, context_bundle);
        self.orchestrator.launch(request, subscriber)
    }

    /// Run an exchange to completion and remember its session for the
    /// workstream
    pub async fn run_message(
        &self,
        workstream_id: &str,
        context_bundle: Option<&str>,
        request: StreamRequest,
        subscriber: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<SendResult, AgentError> {
        let result = self
            .send_message(context_bundle, request, subscriber)?
            .wait()
            .await?;
        self.record_result(workstream_id, &result);
        Ok(result)
    }

    /// Record the agent session of a finished exchange in the background
    pub fn record_result(&self, workstream_id: &str, result: &SendResult) {
        let Some(session_id) = result.session_id.clone() else {
            return;
        };
        let workstream_id = workstream_id.to_string();
        sync_in_background(
            self.metadata.clone(),
            move |store| store.record_latest_session(&workstream_id, &session_id),
            |message| log::warn!("Failed to record latest session: {message}"),
        );
    }

    pub fn cancel(&self, stream_id: &str) -> bool {
        self.orchestrator.cancel(stream_id)
    }

    pub fn start_terminal(&self, request: StartTerminalRequest) -> Result<TerminalState, AgentError> {
        self.terminals.start(request)
    }

    pub fn stop_terminal(&self) -> TerminalState {
        self.terminals.stop()
    }

    /// Best-effort cleanup on application exit.
    ///
    /// In-flight one-shot streams are left to finish on their own.
    pub fn shutdown(&self) {
        let active = self.orchestrator.registry().active_ids();
        if !active.is_empty() {
            log::debug!("Abandoning {} in-flight streams on shutdown", active.len());
        }
        self.terminals.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_context() {
        assert_eq!(with_context("hi", None), "hi");
        assert_eq!(with_context("hi", Some("  ")), "hi");
        assert_eq!(
            with_context("hi", Some("Branch: main\n")),
            "Branch: main\n\nhi"
        );
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use crate::chat::StreamPayload;
        use crate::metadata::InMemoryMetadataStore;
        use crate::terminal::CommandMode;
        use crate::test_support::fake_agent;
        use std::thread;
        use std::time::{Duration, Instant};
        use tempfile::TempDir;

        const WAIT: Duration = Duration::from_secs(10);

        #[test]
        fn test_refuses_conversation_owned_by_terminal() {
            let dir = TempDir::new().unwrap();
            let config = fake_agent(dir.path(), "exec sleep 30");
            let (tx, _terminal_rx) = mpsc::unbounded_channel();
            let service = AgentService::new(config, Arc::new(InMemoryMetadataStore::new()), tx);

            service
                .start_terminal(StartTerminalRequest {
                    workstream_id: "ws".to_string(),
                    conversation_id: Some("owned".to_string()),
                    working_dir: dir.path().to_path_buf(),
                    command_mode: CommandMode::Standard,
                })
                .unwrap();

            let mut request = StreamRequest::new("hi", dir.path());
            request.resume_session_id = Some("owned".to_string());
            let (events_tx, _events_rx) = mpsc::unbounded_channel();
            let err = service.send_message(None, request, events_tx).err();
            assert!(matches!(
                err,
                Some(AgentError::ConversationBusy { ref conversation_id }) if conversation_id == "owned"
            ));

            service.shutdown();
            assert!(service.terminals().wait_idle(WAIT));
        }

        #[tokio::test]
        async fn test_run_message_prepends_context_and_records_session() {
            let dir = TempDir::new().unwrap();
            // Echo the prompt back as the result text
            let config = fake_agent(
                dir.path(),
                r#"for last; do :; done
printf '{"type":"system","subtype":"init","session_id":"sess-9"}\n'
printf '{"type":"result","subtype":"success","result":"ok","is_error":false,"session_id":"sess-9"}\n'
printf '%s' "$last" > prompt.txt
exit 0"#,
            );
            let store = Arc::new(InMemoryMetadataStore::new());
            let (tx, _terminal_rx) = mpsc::unbounded_channel();
            let service = AgentService::new(config, store.clone(), tx);

            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let result = service
                .run_message(
                    "ws",
                    Some("Context"),
                    StreamRequest::new("question", dir.path()),
                    events_tx,
                )
                .await
                .unwrap();

            assert_eq!(result.session_id.as_deref(), Some("sess-9"));
            assert_eq!(result.result_text, "ok");
            assert!(!result.is_error);

            let prompt = std::fs::read_to_string(dir.path().join("prompt.txt")).unwrap();
            assert_eq!(prompt, "Context\n\nquestion");

            let mut saw_done = false;
            while let Ok(event) = events_rx.try_recv() {
                saw_done |= matches!(event.payload, StreamPayload::Done { .. });
            }
            assert!(saw_done);

            let deadline = Instant::now() + WAIT;
            while store.latest_session("ws").is_none() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(20));
            }
            assert_eq!(store.latest_session("ws").as_deref(), Some("sess-9"));
        }
    }
}
