use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::autocomplete::AutocompleteLists;
use crate::errors::WorkbenchError;
use crate::rules::RuleBook;
use crate::staging::Staging;

/// How long a session stays valid after creation.
const SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// One line of the human-readable audit trail, exported as TSV.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub action: String,
    pub row_id: String,
    pub column: String,
    pub old_value: String,
    pub new_value: String,
}

impl AuditEvent {
    pub fn now(
        action: impl Into<String>,
        row_id: impl ToString,
        column: impl Into<String>,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        AuditEvent {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            action: action.into(),
            row_id: row_id.to_string(),
            column: column.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }
}

/// Everything one user session owns: the staging copy of their upload, the
/// undo history inside it, their rule book, autocomplete lists, and the audit
/// trail. Rules and lists outlive the staging data across re-uploads via
/// their JSON files; the staging layer dies with the session or the next
/// upload.
pub struct SessionState {
    pub file_id: String,
    pub staging: Staging,
    pub rules: RuleBook,
    pub autocomplete: AutocompleteLists,
    pub audit: Vec<AuditEvent>,
}

impl SessionState {
    /// Reject requests carrying a stale or foreign file id.
    pub fn check_file_id(&self, file_id: &str) -> Result<(), WorkbenchError> {
        if self.file_id != file_id {
            return Err(WorkbenchError::Conflict(
                "file id does not match the active session; reload the page".to_string(),
            ));
        }
        Ok(())
    }
}

struct SessionEntry {
    state: Arc<Mutex<SessionState>>,
    expires_at: Instant,
}

/// Process-wide map from session id to session state.
///
/// Lookups go through an `RwLock`; each session's state sits behind its own
/// mutex so overlapping requests against the same staging layer serialize,
/// while different sessions never contend. Expired entries are dropped
/// lazily on lookup and by [`SessionRegistry::purge_expired`].
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session, returning its id for the cookie.
    pub fn create(&self, state: SessionState) -> String {
        let session_id = Uuid::new_v4().to_string();
        let entry = SessionEntry {
            state: Arc::new(Mutex::new(state)),
            expires_at: Instant::now() + SESSION_DURATION,
        };
        self.sessions
            .write()
            .unwrap()
            .insert(session_id.clone(), entry);
        session_id
    }

    /// Look up a live session. Expired sessions are removed and reported as
    /// absent.
    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<SessionState>>> {
        {
            let sessions = self.sessions.read().unwrap();
            if let Some(entry) = sessions.get(session_id) {
                if entry.expires_at > Instant::now() {
                    return Some(Arc::clone(&entry.state));
                }
            } else {
                return None;
            }
        }
        // Known but expired: evict under the write lock.
        self.sessions.write().unwrap().remove(session_id);
        None
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.write().unwrap().remove(session_id);
    }

    /// Drop every expired session. Called opportunistically from the upload
    /// handler rather than from a background task.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        before - sessions.len()
    }

    pub fn required(
        &self,
        session_id: &str,
    ) -> Result<Arc<Mutex<SessionState>>, WorkbenchError> {
        self.get(session_id).ok_or_else(|| {
            WorkbenchError::not_found("session expired or unknown; upload a file first")
        })
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry::new()
    }
}
