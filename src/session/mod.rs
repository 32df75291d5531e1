//! Session store: durable interaction threads with an append-only event
//! history and a mutable working-state blob.
//!
//! Writes to one session are serialized through a per-session lock; writes
//! to different sessions proceed concurrently. When backed by SQLite the
//! store reloads every session (with its events in write order) on startup.

pub mod storage;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use storage::SessionSqliteStorage;

/// One entry in a session's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Unique event id, `evt_{uuid}`.
    pub event_id: String,
    /// Event type, e.g. "session_created", "delegation_started".
    pub event_type: String,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Free-form event payload.
    pub details: Value,
}

impl SessionEvent {
    fn new(event_type: impl Into<String>, details: Value) -> Self {
        Self {
            event_id: format!("evt_{}", Uuid::new_v4().simple()),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            details,
        }
    }
}

/// One interaction thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id, `sid_{uuid}`.
    pub id: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session last changed (event appended or state updated).
    pub last_updated: DateTime<Utc>,
    /// Append-only event history, oldest first.
    pub history: Vec<SessionEvent>,
    /// Mutable working state. Updates merge key-by-key.
    pub state: HashMap<String, Value>,
    /// Caller-supplied metadata, immutable after creation.
    pub metadata: Value,
}

/// In-memory session store with optional SQLite persistence.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    storage: Option<SessionSqliteStorage>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Purely in-memory store. Sessions do not survive a restart.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            storage: None,
        }
    }

    /// SQLite-backed store. Existing sessions are loaded eagerly.
    pub fn with_storage(db_path: impl Into<PathBuf>) -> Result<Self, anyhow::Error> {
        let storage = SessionSqliteStorage::new(db_path)?;
        let sessions = DashMap::new();
        for session in storage.load_all()? {
            sessions.insert(session.id.clone(), Arc::new(Mutex::new(session)));
        }
        log::info!("Session store loaded {} persisted sessions", sessions.len());
        Ok(Self {
            sessions,
            storage: Some(storage),
        })
    }

    /// Create a session and record its "session_created" event.
    pub fn create_session(&self, metadata: Value) -> String {
        let id = format!("sid_{}", Uuid::new_v4().simple());
        let now = Utc::now();
        let created = SessionEvent::new("session_created", Value::Object(Default::default()));
        let session = Session {
            id: id.clone(),
            created_at: now,
            last_updated: now,
            history: vec![created.clone()],
            state: HashMap::new(),
            metadata,
        };

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save_session(&session) {
                log::error!("Failed to persist session {}: {}", id, e);
            }
            if let Err(e) = storage.append_event(&id, &created) {
                log::error!("Failed to persist session event: {}", e);
            }
        }

        self.sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        log::debug!("Created session {}", id);
        id
    }

    /// Append an event to a session's history. Returns the recorded event,
    /// or `None` for an unknown session.
    pub fn append_event(
        &self,
        session_id: &str,
        event_type: impl Into<String>,
        details: Value,
    ) -> Option<SessionEvent> {
        let handle = self.sessions.get(session_id)?.clone();
        let event = SessionEvent::new(event_type, details);

        let mut session = handle.lock();
        session.history.push(event.clone());
        session.last_updated = event.timestamp;
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.append_event(session_id, &event) {
                log::error!("Failed to persist session event: {}", e);
            }
            if let Err(e) = storage.save_session(&session) {
                log::error!("Failed to persist session {}: {}", session_id, e);
            }
        }
        Some(event)
    }

    /// Merge keys into a session's working state and record a
    /// "state_updated" event naming the touched keys. Returns false for an
    /// unknown session.
    pub fn update_state(&self, session_id: &str, updates: HashMap<String, Value>) -> bool {
        let Some(handle) = self.sessions.get(session_id).map(|h| h.clone()) else {
            return false;
        };

        let mut keys: Vec<&String> = updates.keys().collect();
        keys.sort();
        let event = SessionEvent::new(
            "state_updated",
            serde_json::json!({"keys": keys}),
        );

        let mut session = handle.lock();
        for (key, value) in updates {
            session.state.insert(key, value);
        }
        session.history.push(event.clone());
        session.last_updated = event.timestamp;
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.append_event(session_id, &event) {
                log::error!("Failed to persist session event: {}", e);
            }
            if let Err(e) = storage.save_session(&session) {
                log::error!("Failed to persist session {}: {}", session_id, e);
            }
        }
        true
    }

    /// Snapshot a session by id.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .get(session_id)
            .map(|handle| handle.lock().clone())
    }

    /// Number of sessions currently held.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
