//! Registry of in-flight one-shot streams for cancellation

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

/// Bookkeeping for a live one-shot process
#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub stream_id: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Live streams keyed by stream id.
///
/// An entry exists from spawn until the orchestrator observes the process
/// closing its output, so presence means "not yet settled".
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, ActiveStream>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<String, ActiveStream>> {
        self.streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, stream_id: &str, pid: u32) {
        log::trace!("Registering stream {stream_id} (pid {pid})");
        self.streams().insert(
            stream_id.to_string(),
            ActiveStream {
                stream_id: stream_id.to_string(),
                pid,
                started_at: Utc::now(),
            },
        );
    }

    pub fn unregister(&self, stream_id: &str) -> Option<ActiveStream> {
        log::trace!("Unregistering stream {stream_id}");
        self.streams().remove(stream_id)
    }

    pub fn is_running(&self, stream_id: &str) -> bool {
        self.streams().contains_key(stream_id)
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.streams().keys().cloned().collect()
    }

    /// Ask a live stream's process to terminate.
    ///
    /// Returns `false` for unknown or already-settled streams. The stream's
    /// own completion still resolves the pending result, usually with a
    /// non-zero exit code.
    pub fn cancel(&self, stream_id: &str) -> bool {
        // Held across the signal: the worker unregisters before reaping, so
        // the pid cannot be recycled while it is being signalled
        let streams = self.streams();
        let Some(stream) = streams.get(stream_id) else {
            log::trace!("Cancel requested for unknown stream {stream_id}");
            return false;
        };

        log::debug!("Cancelling stream {stream_id} (pid {})", stream.pid);
        crate::platform::terminate_process(stream.pid);
        true
    }
}
