// Session registry
//
// Maps session ids to their owner-task handles. Sessions are created on
// first use and seeded empty (or with content, when the embedder has the
// file text). Closing a session drops its handle; the owner task ends when
// the last handle is gone, which also strands any in-flight fix attempt
// into a terminal state.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use super::owner::SessionHandle;

/// Registry of live document sessions. Cheap to clone; all clones share
/// the same map.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<DashMap<String, SessionHandle>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for a session, creating it empty if it does not exist yet.
    pub fn get_or_create(&self, session_id: &str) -> SessionHandle {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!(session = %session_id, "Opening session");
                SessionHandle::spawn(session_id.to_string(), String::new())
            })
            .value()
            .clone()
    }

    /// Open (or replace) a session seeded with known file content.
    pub fn open_with_content(&self, session_id: &str, content: impl Into<String>) -> SessionHandle {
        let handle = SessionHandle::spawn(session_id.to_string(), content.into());
        self.sessions.insert(session_id.to_string(), handle.clone());
        handle
    }

    /// Handle for an existing session, if any.
    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|h| h.value().clone())
    }

    /// Close a session: remove it from the registry so its owner task ends
    /// once in-flight commands drain.
    pub fn close(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            info!(session = %session_id, "Closing session");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
