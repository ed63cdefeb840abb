//! One-shot Claude CLI exchanges
//!
//! Spawns the CLI in `--print` stream-json mode for a single prompt, decodes
//! stdout line by line into [`StreamEvent`]s and resolves a [`SendResult`]
//! once the process exits.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::decoder::{decode_line, summarize_denials, DecodedLine};
use super::registry::StreamRegistry;
use super::types::{
    Fact, PermissionDenialFact, ResultFact, SendResult, StreamEvent, StreamPayload, StreamRequest,
};
use crate::claude_cli::BinaryResolver;
use crate::config::EngineConfig;
use crate::error::AgentError;

/// ANSI CSI / OSC sequences and stray C0 control characters
static CONTROL_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]|[\x00-\x08\x0b-\x1f\x7f]")
        .expect("control sequence pattern is valid")
});

/// Latest agent session id, shared between the stdout and stderr readers
type SessionCell = Arc<Mutex<Option<String>>>;

/// Build the CLI argument vector for a one-shot request.
///
/// The prompt is the final positional argument.
pub fn build_args(request: &StreamRequest) -> Vec<String> {
    let mut args: Vec<String> = [
        "-p",
        "--output-format",
        "stream-json",
        "--verbose",
        "--include-partial-messages",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if let Some(session_id) = &request.resume_session_id {
        args.push("--resume".to_string());
        args.push(session_id.clone());
    }
    if let Some(model) = &request.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(mode) = request.permission_mode {
        args.push("--permission-mode".to_string());
        args.push(mode.as_cli_arg().to_string());
    }
    if request.skip_permissions {
        args.push("--dangerously-skip-permissions".to_string());
    }

    args.push(request.message.clone());
    args
}

/// Trim a stderr line and strip terminal control sequences.
/// Returns `None` if nothing printable remains.
pub fn clean_stderr_line(line: &str) -> Option<String> {
    let cleaned = CONTROL_SEQUENCE.replace_all(line, "");
    let cleaned = cleaned.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

// ============================================================================
// Accumulation
// ============================================================================

/// Running state of one exchange, fed with decoded lines
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pub session_id: Option<String>,
    /// Concatenated token deltas
    pub token_text: String,
    /// Text of the most recent complete assistant message
    pub final_message_text: String,
    pub result: Option<ResultFact>,
    pub denials: Vec<PermissionDenialFact>,
}

impl StreamAccumulator {
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            session_id,
            ..Default::default()
        }
    }

    /// Fold a decoded line into the running state and return the payloads
    /// to publish, in order.
    pub fn apply(&mut self, decoded: DecodedLine) -> Vec<StreamPayload> {
        if let Some(session_id) = decoded.session_id {
            if self.session_id.as_deref() != Some(session_id.as_str()) {
                log::trace!("Agent session is now {session_id}");
            }
            self.session_id = Some(session_id);
        }

        decoded
            .facts
            .into_iter()
            .map(|fact| {
                match &fact {
                    Fact::Token(text) => self.token_text.push_str(text),
                    Fact::Assistant(text) => self.final_message_text = text.clone(),
                    Fact::Result(result) => self.result = Some(result.clone()),
                    Fact::Permission(denials) => self.denials.extend(denials.iter().cloned()),
                    Fact::Init(_) | Fact::ToolUse(_) | Fact::ToolResult(_) | Fact::Question(_) => {}
                }
                StreamPayload::from(fact)
            })
            .collect()
    }

    /// Resolve the exchange once the process has exited
    pub fn finish(self, stream_id: &str, exit_code: Option<i32>, stderr_lines: &[String]) -> SendResult {
        let agent_result = self.result.as_ref().and_then(|r| r.result.clone());
        let agent_error = self.result.as_ref().is_some_and(|r| r.is_error);

        let is_error = agent_error || exit_code != Some(0) || !self.denials.is_empty();

        let assistant_text = [&self.token_text, &self.final_message_text]
            .into_iter()
            .find(|text| !text.trim().is_empty())
            .cloned()
            .or_else(|| agent_result.clone().filter(|r| !r.trim().is_empty()))
            .unwrap_or_default();

        let base = match agent_result {
            Some(result) => result,
            None if is_error => stderr_lines.join("\n"),
            None => String::new(),
        };
        let result_text = if self.denials.is_empty() {
            base
        } else {
            let summary = summarize_denials(&self.denials);
            if base.trim().is_empty() {
                summary
            } else {
                format!("{base}\n\n{summary}")
            }
        };

        SendResult {
            stream_id: stream_id.to_string(),
            session_id: self.session_id,
            assistant_text,
            result_text,
            is_error,
            exit_code,
        }
    }
}

// ============================================================================
// Handles
// ============================================================================

/// Pending result of a one-shot exchange
pub struct StreamOutcome {
    pub stream_id: String,
    rx: oneshot::Receiver<Result<SendResult, AgentError>>,
}

impl StreamOutcome {
    pub async fn wait(self) -> Result<SendResult, AgentError> {
        self.rx.await.unwrap_or(Err(AgentError::Cancelled))
    }

    /// Block the current thread until the exchange settles.
    /// Must not be called from within an async runtime.
    pub fn blocking_wait(self) -> Result<SendResult, AgentError> {
        self.rx.blocking_recv().unwrap_or(Err(AgentError::Cancelled))
    }
}

/// Live event feed plus pending result of a started exchange
pub struct StreamHandle {
    pub stream_id: String,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
    pub outcome: StreamOutcome,
}

/// Publishes events for one stream; a closed subscriber is ignored
#[derive(Clone)]
struct Publisher {
    stream_id: String,
    session: SessionCell,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl Publisher {
    fn publish(&self, payload: StreamPayload) {
        let session_id = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let event = StreamEvent::new(&self.stream_id, session_id.as_deref(), payload);
        let _ = self.tx.send(event);
    }

    fn set_session(&self, session_id: Option<String>) {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session_id;
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs one-shot exchanges against the Claude CLI.
///
/// Exchanges are independent: each gets its own stream id, process and
/// event channel, and shares only the cancellation registry.
pub struct StreamOrchestrator {
    config: EngineConfig,
    resolver: Arc<BinaryResolver>,
    registry: Arc<StreamRegistry>,
}

impl StreamOrchestrator {
    pub fn new(
        config: EngineConfig,
        resolver: Arc<BinaryResolver>,
        registry: Arc<StreamRegistry>,
    ) -> Self {
        Self {
            config,
            resolver,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Request early termination of a live stream
    pub fn cancel(&self, stream_id: &str) -> bool {
        self.registry.cancel(stream_id)
    }

    /// Start an exchange with a fresh event channel
    pub fn start(&self, request: StreamRequest) -> Result<StreamHandle, AgentError> {
        let (tx, events) = mpsc::unbounded_channel();
        let outcome = self.launch(request, tx)?;
        Ok(StreamHandle {
            stream_id: outcome.stream_id.clone(),
            events,
            outcome,
        })
    }

    /// Run an exchange to completion, publishing events to `subscriber`
    pub async fn run(
        &self,
        request: StreamRequest,
        subscriber: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<SendResult, AgentError> {
        self.launch(request, subscriber)?.wait().await
    }

    /// Spawn the CLI and hand its output to a reader thread.
    ///
    /// A missing binary fails here, before anything is published. A spawn
    /// failure is published as an `error` event and settles the outcome
    /// with an error.
    pub fn launch(
        &self,
        request: StreamRequest,
        tx: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<StreamOutcome, AgentError> {
        let search_path = self.config.effective_search_path();
        let cli_path = self
            .resolver
            .resolve(&search_path)
            .ok_or(AgentError::BinaryNotFound)?;

        let stream_id = Uuid::new_v4().to_string();
        let args = build_args(&request);
        log::debug!(
            "Claude CLI command for stream {stream_id}: {} {} <prompt: {} chars>",
            cli_path.display(),
            args[..args.len() - 1].join(" "),
            request.message.len()
        );

        let publisher = Publisher {
            stream_id: stream_id.clone(),
            session: Arc::new(Mutex::new(request.resume_session_id.clone())),
            tx,
        };
        let (outcome_tx, rx) = oneshot::channel();
        let outcome = StreamOutcome {
            stream_id: stream_id.clone(),
            rx,
        };

        let mut cmd = Command::new(&cli_path);
        cmd.args(&args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The CLI refuses to start when it believes it is nested in another session
            .env_remove("CLAUDECODE");
        if !search_path.is_empty() {
            cmd.env("PATH", &search_path);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let error = AgentError::Spawn(format!("{}: {e}", cli_path.display()));
                log::error!("Stream {stream_id}: {error}");
                publisher.publish(StreamPayload::Error {
                    message: error.to_string(),
                });
                let _ = outcome_tx.send(Err(error));
                return Ok(outcome);
            }
        };

        self.registry.register(&stream_id, child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let registry = self.registry.clone();
        let resume_session_id = request.resume_session_id;
        let worker = StreamWorker {
            stream_id,
            cli_path,
            publisher,
            registry,
        };
        thread::spawn(move || {
            let result = worker.run(child, stdout, stderr, resume_session_id);
            let _ = outcome_tx.send(result);
        });

        Ok(outcome)
    }
}

struct StreamWorker {
    stream_id: String,
    cli_path: PathBuf,
    publisher: Publisher,
    registry: Arc<StreamRegistry>,
}

impl StreamWorker {
    fn run(
        self,
        mut child: Child,
        stdout: Option<impl Read + Send + 'static>,
        stderr: Option<impl Read + Send + 'static>,
        resume_session_id: Option<String>,
    ) -> Result<SendResult, AgentError> {
        let stderr_reader = stderr.map(|stderr| {
            let publisher = self.publisher.clone();
            thread::spawn(move || read_stderr(stderr, &publisher))
        });

        let mut acc = StreamAccumulator::new(resume_session_id);
        if let Some(stdout) = stdout {
            for_each_line(stdout, |line| {
                let Some(decoded) = decode_line(line) else {
                    return;
                };
                let payloads = acc.apply(decoded);
                self.publisher.set_session(acc.session_id.clone());
                for payload in payloads {
                    self.publisher.publish(payload);
                }
            });
        }

        let stderr_lines = stderr_reader
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default();

        self.registry.unregister(&self.stream_id);

        let exit_code = match child.wait() {
            Ok(status) => status.code(),
            Err(e) => {
                let error = AgentError::Spawn(format!("{}: {e}", self.cli_path.display()));
                log::error!("Stream {}: {error}", self.stream_id);
                self.publisher.publish(StreamPayload::Error {
                    message: error.to_string(),
                });
                return Err(error);
            }
        };

        let result = acc.finish(&self.stream_id, exit_code, &stderr_lines);
        log::info!(
            "Stream {} finished: exit {:?}, error {}, {} chars",
            self.stream_id,
            result.exit_code,
            result.is_error,
            result.assistant_text.len()
        );

        self.publisher.publish(StreamPayload::Done {
            exit_code: result.exit_code,
            is_error: result.is_error,
        });
        Ok(result)
    }
}

/// Publish cleaned stderr lines as `error` events and return them
fn read_stderr(stderr: impl Read, publisher: &Publisher) -> Vec<String> {
    let mut lines = Vec::new();
    for_each_line(stderr, |line| {
        if let Some(cleaned) = clean_stderr_line(line) {
            log::warn!("Claude CLI stderr: {cleaned}");
            publisher.publish(StreamPayload::Error {
                message: cleaned.clone(),
            });
            lines.push(cleaned);
        }
    });
    lines
}

/// Invoke `f` for every line of `reader`, tolerating invalid UTF-8
fn for_each_line(reader: impl Read, mut f: impl FnMut(&str)) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                f(line.trim_end_matches(['\r', '\n']));
            }
            Err(e) => {
                log::warn!("Error reading Claude CLI output: {e}");
                break;
            }
        }
    }
}
