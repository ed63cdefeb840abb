//! Single-slot interactive session manager
//!
//! Only one interactive Claude CLI session may exist at a time. The slot
//! moves `Idle -> Starting -> Active -> Stopping -> Idle`; an unrequested
//! exit goes straight from `Active` back to `Idle`. There is no separate
//! crashed phase: a crash is reported as [`TerminalEvent::Exit`] where a
//! requested stop is reported as [`TerminalEvent::Stopped`]. The transition
//! to `Idle` always happens on the reader thread once the process has exited.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use portable_pty::{Child, ChildKiller, MasterPty};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::pty::{build_terminal_args, pty_size, spawn_pty};
use super::types::{CommandMode, StartTerminalRequest, TerminalEvent, TerminalPhase, TerminalState};
use crate::claude_cli::BinaryResolver;
use crate::config::EngineConfig;
use crate::error::AgentError;
use crate::metadata::{sync_in_background, ChatMetadataStore};

/// Size of one pty read
const READ_CHUNK_SIZE: usize = 4096;

/// Live pty handles of an active session
struct LivePty {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

/// Occupant of the session slot
struct Slot {
    /// Distinguishes this occupant from any later one
    token: u64,
    phase: TerminalPhase,
    conversation_id: String,
    workstream_id: String,
    working_dir: PathBuf,
    command_mode: CommandMode,
    /// Started without a conversation id
    fresh: bool,
    started_at: DateTime<Utc>,
    cols: u16,
    rows: u16,
    pid: Option<u32>,
    stop_requested: bool,
    live: Option<LivePty>,
}

impl Slot {
    fn snapshot(&self) -> TerminalState {
        TerminalState {
            phase: self.phase,
            conversation_id: Some(self.conversation_id.clone()),
            workstream_id: Some(self.workstream_id.clone()),
            working_dir: Some(self.working_dir.clone()),
            command_mode: Some(self.command_mode),
            started_at: Some(self.started_at),
            pid: self.pid,
            cols: self.cols,
            rows: self.rows,
        }
    }

    /// Whether `request` targets this very session
    fn matches(&self, request: &StartTerminalRequest) -> bool {
        match &request.conversation_id {
            Some(id) => *id == self.conversation_id,
            None => self.fresh && request.workstream_id == self.workstream_id,
        }
    }

    /// Ask the process to terminate; the reader thread observes the exit
    fn signal_stop(&mut self) {
        if let Some(pid) = self.pid {
            crate::platform::terminate_process(pid);
        } else if let Some(live) = self.live.as_mut() {
            if let Err(e) = live.killer.kill() {
                log::warn!("Failed to kill interactive session: {e}");
            }
        }
    }
}

struct Inner {
    config: EngineConfig,
    resolver: Arc<BinaryResolver>,
    metadata: Arc<dyn ChatMetadataStore>,
    events: mpsc::UnboundedSender<TerminalEvent>,
    slot: Mutex<Option<Slot>>,
    /// Signalled whenever the slot becomes empty
    idle: Condvar,
    next_token: AtomicU64,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<Slot>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: TerminalEvent) {
        // A torn-down UI simply stops listening
        let _ = self.events.send(event);
    }

    /// Empty the slot if it still belongs to `token`
    fn release(&self, token: u64) -> Option<Slot> {
        let mut slot = self.slot();
        let released = match slot.as_ref() {
            Some(current) if current.token == token => slot.take(),
            _ => None,
        };
        self.idle.notify_all();
        released
    }
}

/// Owner of the process-wide interactive session slot.
///
/// Cheap to clone; clones share the slot.
#[derive(Clone)]
pub struct TerminalManager {
    inner: Arc<Inner>,
}

impl TerminalManager {
    pub fn new(
        config: EngineConfig,
        resolver: Arc<BinaryResolver>,
        metadata: Arc<dyn ChatMetadataStore>,
        events: mpsc::UnboundedSender<TerminalEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                resolver,
                metadata,
                events,
                slot: Mutex::new(None),
                idle: Condvar::new(),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Current slot snapshot
    pub fn state(&self) -> TerminalState {
        self.inner
            .slot()
            .as_ref()
            .map(Slot::snapshot)
            .unwrap_or_else(TerminalState::idle)
    }

    /// Conversation owned by the slot, if any
    pub fn active_conversation_id(&self) -> Option<String> {
        self.inner
            .slot()
            .as_ref()
            .map(|slot| slot.conversation_id.clone())
    }

    /// Open the interactive session.
    ///
    /// Starting the session that already occupies the slot is a no-op that
    /// returns its state. Any other occupant makes this fail without
    /// touching it.
    pub fn start(&self, request: StartTerminalRequest) -> Result<TerminalState, AgentError> {
        let inner = &self.inner;
        let token = inner.next_token.fetch_add(1, Ordering::Relaxed);

        let (conversation_id, resume) = {
            let mut slot = inner.slot();
            if let Some(current) = slot.as_ref() {
                if current.phase != TerminalPhase::Stopping && current.matches(&request) {
                    log::trace!(
                        "Interactive session {} already active",
                        current.conversation_id
                    );
                    return Ok(current.snapshot());
                }
                return Err(AgentError::SessionActive {
                    conversation_id: current.conversation_id.clone(),
                });
            }

            let (conversation_id, resume) = match &request.conversation_id {
                Some(id) => (id.clone(), true),
                None => (Uuid::new_v4().to_string(), false),
            };
            *slot = Some(Slot {
                token,
                phase: TerminalPhase::Starting,
                conversation_id: conversation_id.clone(),
                workstream_id: request.workstream_id.clone(),
                working_dir: request.working_dir.clone(),
                command_mode: request.command_mode,
                fresh: !resume,
                started_at: Utc::now(),
                cols: inner.config.terminal_cols,
                rows: inner.config.terminal_rows,
                pid: None,
                stop_requested: false,
                live: None,
            });
            (conversation_id, resume)
        };

        log::info!(
            "Starting interactive session {conversation_id} for workstream {}",
            request.workstream_id
        );

        let spawned = self.spawn(&conversation_id, resume, &request);
        let mut spawned = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                log::error!("Failed to start interactive session {conversation_id}: {e}");
                inner.release(token);
                inner.emit(TerminalEvent::Error {
                    conversation_id: Some(conversation_id),
                    workstream_id: Some(request.workstream_id),
                    message: e.to_string(),
                    fatal: true,
                });
                return Err(e);
            }
        };

        let state = {
            let mut slot = inner.slot();
            let Some(current) = slot.as_mut().filter(|s| s.token == token) else {
                let _ = spawned.child.kill();
                return Err(AgentError::Pty("Session slot was reset during start".to_string()));
            };
            current.pid = spawned.child.process_id();
            current.live = Some(LivePty {
                master: spawned.master,
                writer: spawned.writer,
                killer: spawned.child.clone_killer(),
            });
            if current.stop_requested {
                current.phase = TerminalPhase::Stopping;
                current.signal_stop();
            } else {
                current.phase = TerminalPhase::Active;
            }
            current.snapshot()
        };

        inner.emit(TerminalEvent::Started {
            state: state.clone(),
        });
        self.sync_metadata(&request.workstream_id, &conversation_id, true);

        let reader = ReaderThread {
            manager: self.clone(),
            token,
            conversation_id,
            workstream_id: request.workstream_id,
        };
        thread::spawn(move || reader.run(spawned.reader, spawned.child));

        Ok(state)
    }

    fn spawn(
        &self,
        conversation_id: &str,
        resume: bool,
        request: &StartTerminalRequest,
    ) -> Result<super::pty::SpawnedPty, AgentError> {
        let config = &self.inner.config;
        let search_path = config.effective_search_path();
        let cli_path = self
            .inner
            .resolver
            .resolve(&search_path)
            .ok_or(AgentError::BinaryNotFound)?;
        let args = build_terminal_args(conversation_id, resume, request.command_mode);

        spawn_pty(
            &cli_path,
            &args,
            &request.working_dir,
            config.terminal_cols,
            config.terminal_rows,
            &search_path,
            &config.terminal_env,
        )
    }

    /// Request the session to end.
    ///
    /// Returns immediately; the slot becomes idle when the exit is observed.
    /// With no session this is a no-op returning the idle state.
    pub fn stop(&self) -> TerminalState {
        let mut slot = self.inner.slot();
        let Some(current) = slot.as_mut() else {
            return TerminalState::idle();
        };

        log::info!("Stopping interactive session {}", current.conversation_id);
        current.stop_requested = true;
        current.phase = TerminalPhase::Stopping;
        current.signal_stop();
        current.snapshot()
    }

    /// Write raw bytes to the session's pty
    pub fn write(&self, data: &[u8]) -> Result<(), AgentError> {
        let mut slot = self.inner.slot();
        let live = slot
            .as_mut()
            .and_then(|s| s.live.as_mut())
            .ok_or(AgentError::NoActiveSession)?;

        live.writer.write_all(data)?;
        live.writer.flush()?;
        Ok(())
    }

    /// Resize the pty. Ignored without a session or for non-finite sizes.
    pub fn resize(&self, cols: f64, rows: f64) -> Result<(), AgentError> {
        let config = &self.inner.config;
        let Some((cols, rows)) = clamp_dimensions(cols, rows, config.min_cols, config.min_rows)
        else {
            log::trace!("Ignoring resize to non-finite size");
            return Ok(());
        };

        let mut slot = self.inner.slot();
        let Some(current) = slot.as_mut() else {
            return Ok(());
        };
        let Some(live) = current.live.as_ref() else {
            return Ok(());
        };

        live.master
            .resize(pty_size(cols, rows))
            .map_err(|e| AgentError::Pty(format!("Failed to resize: {e}")))?;
        current.cols = cols;
        current.rows = rows;
        log::trace!("Resized interactive session to {cols}x{rows}");
        Ok(())
    }

    /// Block until the slot is empty or `timeout` passes.
    /// Returns whether the slot is empty.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let slot = self.inner.slot();
        let (slot, _) = self
            .inner
            .idle
            .wait_timeout_while(slot, timeout, |slot| slot.is_some())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.is_none()
    }

    /// Best-effort cleanup on application shutdown
    pub fn shutdown(&self) {
        let state = self.stop();
        if !state.is_idle() {
            log::info!("Requested stop of interactive session during shutdown");
        }
    }

    fn sync_metadata(&self, workstream_id: &str, conversation_id: &str, link: bool) {
        let inner = self.inner.clone();
        let workstream = workstream_id.to_string();
        let conversation = conversation_id.to_string();
        let (error_workstream, error_conversation) = (workstream.clone(), conversation.clone());

        sync_in_background(
            self.inner.metadata.clone(),
            move |store| {
                if link {
                    store.link_conversation(&workstream, &conversation)?;
                }
                store.record_latest_session(&workstream, &conversation)
            },
            move |message| {
                inner.emit(TerminalEvent::Error {
                    conversation_id: Some(error_conversation),
                    workstream_id: Some(error_workstream),
                    message,
                    fatal: false,
                });
            },
        );
    }
}

/// Clamp a requested size to the configured minimums.
/// `None` when either dimension is not finite.
pub fn clamp_dimensions(cols: f64, rows: f64, min_cols: u16, min_rows: u16) -> Option<(u16, u16)> {
    if !cols.is_finite() || !rows.is_finite() {
        return None;
    }
    let clamp = |value: f64, min: u16| value.floor().clamp(f64::from(min), f64::from(u16::MAX)) as u16;
    Some((clamp(cols, min_cols), clamp(rows, min_rows)))
}

/// Pumps pty output to the event channel and handles process exit
struct ReaderThread {
    manager: TerminalManager,
    token: u64,
    conversation_id: String,
    workstream_id: String,
}

impl ReaderThread {
    fn run(self, mut reader: Box<dyn Read + Send>, mut child: Box<dyn Child + Send + Sync>) {
        let inner = &self.manager.inner;
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    log::trace!("Interactive session EOF for {}", self.conversation_id);
                    break;
                }
                Ok(n) => inner.emit(TerminalEvent::Output {
                    conversation_id: self.conversation_id.clone(),
                    workstream_id: self.workstream_id.clone(),
                    data: buf[..n].to_vec(),
                }),
                Err(e) => {
                    // EIO once the child side closes on Linux
                    log::trace!("Interactive session read ended: {e}");
                    break;
                }
            }
        }

        let (exit_code, signal) = match child.wait() {
            Ok(status) => (Some(status.exit_code()), status.signal().map(str::to_string)),
            Err(e) => {
                log::warn!("Failed to wait for interactive session: {e}");
                (None, None)
            }
        };

        let stop_requested = inner
            .release(self.token)
            .map(|slot| slot.stop_requested)
            .unwrap_or(false);

        log::info!(
            "Interactive session {} exited (code {exit_code:?}, signal {signal:?}, requested {stop_requested})",
            self.conversation_id
        );

        let event = if stop_requested {
            TerminalEvent::Stopped {
                conversation_id: self.conversation_id.clone(),
                workstream_id: self.workstream_id.clone(),
                exit_code,
                signal,
                state: TerminalState::idle(),
            }
        } else {
            TerminalEvent::Exit {
                conversation_id: self.conversation_id.clone(),
                workstream_id: self.workstream_id.clone(),
                exit_code,
                signal,
                state: TerminalState::idle(),
            }
        };
        inner.emit(event);

        self.manager
            .sync_metadata(&self.workstream_id, &self.conversation_id, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{InMemoryMetadataStore, NoopMetadataStore};

    fn idle_manager() -> (TerminalManager, mpsc::UnboundedReceiver<TerminalEvent>) {
        let config = EngineConfig::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = TerminalManager::new(
            config.clone(),
            Arc::new(BinaryResolver::new(&config)),
            Arc::new(NoopMetadataStore),
            tx,
        );
        (manager, rx)
    }

    #[test]
    fn test_clamp_dimensions() {
        assert_eq!(clamp_dimensions(100.0, 40.0, 20, 5), Some((100, 40)));
        assert_eq!(clamp_dimensions(3.0, 1.0, 20, 5), Some((20, 5)));
        assert_eq!(clamp_dimensions(-10.0, 80.7, 20, 5), Some((20, 80)));
        assert_eq!(clamp_dimensions(1e9, 24.0, 20, 5), Some((u16::MAX, 24)));
        assert_eq!(clamp_dimensions(f64::NAN, 24.0, 20, 5), None);
        assert_eq!(clamp_dimensions(80.0, f64::INFINITY, 20, 5), None);
    }

    #[test]
    fn test_idle_operations() {
        let (manager, mut rx) = idle_manager();

        assert!(manager.state().is_idle());
        assert!(manager.stop().is_idle());
        assert!(manager.resize(80.0, 24.0).is_ok());
        assert!(manager.resize(f64::NAN, 24.0).is_ok());
        assert!(matches!(
            manager.write(b"hello"),
            Err(AgentError::NoActiveSession)
        ));
        assert!(manager.wait_idle(Duration::from_millis(10)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_slot_matching() {
        let slot = Slot {
            token: 1,
            phase: TerminalPhase::Active,
            conversation_id: "xyz".to_string(),
            workstream_id: "ws".to_string(),
            working_dir: PathBuf::from("/tmp"),
            command_mode: CommandMode::Standard,
            fresh: true,
            started_at: Utc::now(),
            cols: 120,
            rows: 32,
            pid: None,
            stop_requested: false,
            live: None,
        };
        let request = |conversation_id: Option<&str>, workstream_id: &str| StartTerminalRequest {
            workstream_id: workstream_id.to_string(),
            conversation_id: conversation_id.map(str::to_string),
            working_dir: PathBuf::from("/tmp"),
            command_mode: CommandMode::Standard,
        };

        assert!(slot.matches(&request(Some("xyz"), "other")));
        assert!(!slot.matches(&request(Some("abc"), "ws")));
        assert!(slot.matches(&request(None, "ws")));
        assert!(!slot.matches(&request(None, "other")));
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use crate::metadata::{InMemoryMetadataStore, NoopMetadataStore};
        use crate::test_support::fake_agent;
        use std::time::Instant;
        use tempfile::TempDir;

        const WAIT: Duration = Duration::from_secs(10);

        fn manager_with(
            config: EngineConfig,
            metadata: Arc<dyn ChatMetadataStore>,
        ) -> (TerminalManager, mpsc::UnboundedReceiver<TerminalEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let resolver = Arc::new(BinaryResolver::new(&config));
            (TerminalManager::new(config, resolver, metadata, tx), rx)
        }

        fn request(dir: &TempDir, conversation_id: Option<&str>) -> StartTerminalRequest {
            StartTerminalRequest {
                workstream_id: "ws-1".to_string(),
                conversation_id: conversation_id.map(str::to_string),
                working_dir: dir.path().to_path_buf(),
                command_mode: CommandMode::Standard,
            }
        }

        /// Poll the channel until `pred` matches or the deadline passes
        fn wait_for(
            rx: &mut mpsc::UnboundedReceiver<TerminalEvent>,
            mut pred: impl FnMut(&TerminalEvent) -> bool,
        ) -> Option<TerminalEvent> {
            let deadline = Instant::now() + WAIT;
            while Instant::now() < deadline {
                match rx.try_recv() {
                    Ok(event) if pred(&event) => return Some(event),
                    Ok(_) => {}
                    Err(_) => thread::sleep(Duration::from_millis(20)),
                }
            }
            None
        }

        fn output_contains(
            rx: &mut mpsc::UnboundedReceiver<TerminalEvent>,
            needle: &str,
        ) -> bool {
            let mut seen = Vec::new();
            wait_for(rx, |event| {
                if let TerminalEvent::Output { data, .. } = event {
                    seen.extend_from_slice(data);
                }
                String::from_utf8_lossy(&seen).contains(needle)
            })
            .is_some()
        }

        #[test]
        fn test_exclusive_session_slot() {
            let dir = TempDir::new().unwrap();
            let config = fake_agent(dir.path(), "exec sleep 30");
            let (manager, mut rx) = manager_with(config, Arc::new(NoopMetadataStore));

            let xyz = manager.start(request(&dir, Some("xyz"))).unwrap();
            assert_eq!(xyz.phase, TerminalPhase::Active);
            assert_eq!(xyz.conversation_id.as_deref(), Some("xyz"));
            assert!(matches!(
                wait_for(&mut rx, |e| matches!(e, TerminalEvent::Started { .. })),
                Some(TerminalEvent::Started { .. })
            ));

            let err = manager.start(request(&dir, Some("abc"))).unwrap_err();
            assert!(matches!(err, AgentError::SessionActive { .. }));
            assert!(err.to_string().contains("xyz"));
            assert_eq!(manager.state(), xyz);

            let again = manager.start(request(&dir, Some("xyz"))).unwrap();
            assert_eq!(again, xyz);

            let stopping = manager.stop();
            assert_eq!(stopping.phase, TerminalPhase::Stopping);
            assert!(manager.wait_idle(WAIT));

            let stopped = wait_for(&mut rx, |e| matches!(e, TerminalEvent::Stopped { .. }));
            match stopped {
                Some(TerminalEvent::Stopped {
                    conversation_id,
                    state,
                    ..
                }) => {
                    assert_eq!(conversation_id, "xyz");
                    assert!(state.is_idle());
                }
                other => panic!("expected stopped event, got {other:?}"),
            }

            let abc = manager.start(request(&dir, Some("abc"))).unwrap();
            assert_eq!(abc.phase, TerminalPhase::Active);
            assert_eq!(abc.conversation_id.as_deref(), Some("abc"));

            manager.shutdown();
            assert!(manager.wait_idle(WAIT));
        }

        #[test]
        fn test_fresh_session_is_idempotent_per_workstream() {
            let dir = TempDir::new().unwrap();
            let config = fake_agent(dir.path(), "exec sleep 30");
            let (manager, _rx) = manager_with(config, Arc::new(NoopMetadataStore));

            let first = manager.start(request(&dir, None)).unwrap();
            let conversation_id = first.conversation_id.clone().unwrap();
            assert!(Uuid::parse_str(&conversation_id).is_ok());

            let second = manager.start(request(&dir, None)).unwrap();
            assert_eq!(second, first);

            manager.shutdown();
            assert!(manager.wait_idle(WAIT));
        }

        #[test]
        fn test_input_and_output() {
            let dir = TempDir::new().unwrap();
            let config = fake_agent(dir.path(), "read line\necho \"got:$line\"\nexit 0");
            let (manager, mut rx) = manager_with(config, Arc::new(NoopMetadataStore));

            manager.start(request(&dir, Some("io"))).unwrap();
            manager.resize(100.0, 30.0).unwrap();
            assert_eq!(manager.state().cols, 100);

            manager.write(b"hello\r").unwrap();
            assert!(output_contains(&mut rx, "got:hello"));

            let exit = wait_for(&mut rx, |e| matches!(e, TerminalEvent::Exit { .. }));
            assert!(matches!(
                exit,
                Some(TerminalEvent::Exit { exit_code: Some(0), .. })
            ));
            assert!(manager.wait_idle(WAIT));
        }

        #[test]
        fn test_involuntary_exit() {
            let dir = TempDir::new().unwrap();
            let config = fake_agent(dir.path(), "echo crashing\nexit 3");
            let (manager, mut rx) = manager_with(config, Arc::new(NoopMetadataStore));

            manager.start(request(&dir, Some("crash"))).unwrap();
            let exit = wait_for(&mut rx, |e| {
                matches!(e, TerminalEvent::Exit { .. } | TerminalEvent::Stopped { .. })
            });
            match exit {
                Some(TerminalEvent::Exit {
                    exit_code, state, ..
                }) => {
                    assert_eq!(exit_code, Some(3));
                    assert!(state.is_idle());
                }
                other => panic!("expected exit event, got {other:?}"),
            }
            assert!(manager.wait_idle(WAIT));
            assert!(matches!(
                manager.write(b"x"),
                Err(AgentError::NoActiveSession)
            ));
        }

        #[test]
        fn test_start_records_metadata() {
            let dir = TempDir::new().unwrap();
            let config = fake_agent(dir.path(), "exec sleep 30");
            let store = Arc::new(InMemoryMetadataStore::new());
            let (manager, _rx) = manager_with(config, store.clone());

            manager.start(request(&dir, Some("meta"))).unwrap();

            let deadline = Instant::now() + WAIT;
            while store.latest_session("ws-1").is_none() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(20));
            }
            assert_eq!(store.latest_session("ws-1").as_deref(), Some("meta"));
            assert_eq!(store.conversations("ws-1"), vec!["meta".to_string()]);

            manager.shutdown();
            assert!(manager.wait_idle(WAIT));
        }

        #[test]
        fn test_metadata_failure_is_non_fatal() {
            struct BrokenStore;
            impl ChatMetadataStore for BrokenStore {
                fn record_latest_session(&self, _: &str, _: &str) -> Result<(), AgentError> {
                    Err(AgentError::Metadata("store offline".to_string()))
                }
                fn link_conversation(&self, _: &str, _: &str) -> Result<(), AgentError> {
                    Ok(())
                }
            }

            let dir = TempDir::new().unwrap();
            let config = fake_agent(dir.path(), "exec sleep 30");
            let (manager, mut rx) = manager_with(config, Arc::new(BrokenStore));

            let state = manager.start(request(&dir, Some("m"))).unwrap();
            assert_eq!(state.phase, TerminalPhase::Active);

            let error = wait_for(&mut rx, |e| matches!(e, TerminalEvent::Error { .. }));
            assert!(matches!(
                error,
                Some(TerminalEvent::Error { fatal: false, ref message, .. }) if message.contains("store offline")
            ));
            assert_eq!(manager.state().phase, TerminalPhase::Active);

            manager.shutdown();
            assert!(manager.wait_idle(WAIT));
        }

        #[test]
        fn test_missing_binary_leaves_slot_idle() {
            let dir = TempDir::new().unwrap();
            let config = EngineConfig {
                search_path: Some(dir.path().to_string_lossy().to_string()),
                ..crate::test_support::fake_cli_config()
            };
            let (manager, mut rx) = manager_with(config, Arc::new(NoopMetadataStore));

            let err = manager.start(request(&dir, Some("x"))).unwrap_err();
            assert!(matches!(err, AgentError::BinaryNotFound));
            assert!(manager.state().is_idle());
            assert!(matches!(
                rx.try_recv(),
                Ok(TerminalEvent::Error { fatal: true, .. })
            ));
        }
    }

    #[test]
    fn test_in_memory_store_is_usable_as_collaborator() {
        let config = EngineConfig::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let store: Arc<dyn ChatMetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let manager = TerminalManager::new(
            config.clone(),
            Arc::new(BinaryResolver::new(&config)),
            store,
            tx,
        );
        assert!(manager.active_conversation_id().is_none());
    }
}
