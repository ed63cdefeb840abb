//! Chat-reference metadata collaborator
//!
//! The relational store that tracks which agent session belongs to which
//! workstream lives outside this crate. The engines only call into it
//! fire-and-forget, from a detached thread, and surface failures as
//! non-fatal events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crate::error::AgentError;

/// Store of chat references per workstream
pub trait ChatMetadataStore: Send + Sync {
    /// Remember `session_id` as the most recent agent session of a workstream
    fn record_latest_session(&self, workstream_id: &str, session_id: &str)
        -> Result<(), AgentError>;

    /// Attach a conversation to a workstream
    fn link_conversation(&self, workstream_id: &str, conversation_id: &str)
        -> Result<(), AgentError>;
}

/// Run a metadata update on a detached thread.
///
/// `on_error` receives the failure message; it is never propagated to the
/// operation that triggered the sync.
pub fn sync_in_background<F, E>(store: Arc<dyn ChatMetadataStore>, update: F, on_error: E)
where
    F: FnOnce(&dyn ChatMetadataStore) -> Result<(), AgentError> + Send + 'static,
    E: FnOnce(String) + Send + 'static,
{
    thread::spawn(move || {
        if let Err(e) = update(store.as_ref()) {
            log::warn!("Background metadata sync failed: {e}");
            on_error(e.to_string());
        }
    });
}

/// Metadata store that forgets everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetadataStore;

impl ChatMetadataStore for NoopMetadataStore {
    fn record_latest_session(&self, _: &str, _: &str) -> Result<(), AgentError> {
        Ok(())
    }

    fn link_conversation(&self, _: &str, _: &str) -> Result<(), AgentError> {
        Ok(())
    }
}

/// In-process metadata store
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    latest: Mutex<HashMap<String, String>>,
    links: Mutex<HashMap<String, Vec<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest_session(&self, workstream_id: &str) -> Option<String> {
        lock(&self.latest).get(workstream_id).cloned()
    }

    pub fn conversations(&self, workstream_id: &str) -> Vec<String> {
        lock(&self.links)
            .get(workstream_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl ChatMetadataStore for InMemoryMetadataStore {
    fn record_latest_session(
        &self,
        workstream_id: &str,
        session_id: &str,
    ) -> Result<(), AgentError> {
        lock(&self.latest).insert(workstream_id.to_string(), session_id.to_string());
        Ok(())
    }

    fn link_conversation(
        &self,
        workstream_id: &str,
        conversation_id: &str,
    ) -> Result<(), AgentError> {
        let mut links = lock(&self.links);
        let conversations = links.entry(workstream_id.to_string()).or_default();
        if !conversations.iter().any(|c| c == conversation_id) {
            conversations.push(conversation_id.to_string());
        }
        Ok(())
    }
}
