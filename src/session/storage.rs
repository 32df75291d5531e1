//! SQLite persistence for sessions.
//!
//! One row per session holding the mutable working-state blob, plus an
//! append-only events table whose rowid preserves write order for recovery.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use super::{Session, SessionEvent};

/// SQLite-backed session storage.
pub struct SessionSqliteStorage {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
}

impl SessionSqliteStorage {
    /// Open (or create) the database and ensure the schema exists.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self, anyhow::Error> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let storage = Self { db_path };
        storage.initialize_db()?;
        Ok(storage)
    }

    fn initialize_db(&self) -> Result<(), anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                state TEXT NOT NULL,
                metadata TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                details TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Insert or update the session row (working state is overwritten; the
    /// event history lives only in the append-only table).
    pub fn save_session(&self, session: &Session) -> Result<(), anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO sessions (session_id, created_at, last_updated, state, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id) DO UPDATE SET
                last_updated = excluded.last_updated,
                state = excluded.state",
            params![
                session.id,
                session.created_at.to_rfc3339(),
                session.last_updated.to_rfc3339(),
                serde_json::to_string(&session.state)?,
                serde_json::to_string(&session.metadata)?,
            ],
        )?;
        Ok(())
    }

    /// Append one event. Never updates or deletes existing rows.
    pub fn append_event(&self, session_id: &str, event: &SessionEvent) -> Result<(), anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO session_events (session_id, event_id, event_type, timestamp, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                event.event_id,
                event.event_type,
                event.timestamp.to_rfc3339(),
                serde_json::to_string(&event.details)?,
            ],
        )?;
        Ok(())
    }

    /// Load every persisted session with its events in write order.
    pub fn load_all(&self) -> Result<Vec<Session>, anyhow::Error> {
        if !Path::new(&self.db_path).exists() {
            return Ok(Vec::new());
        }
        let conn = Connection::open(&self.db_path)?;

        let mut stmt = conn.prepare(
            "SELECT session_id, created_at, last_updated, state, metadata FROM sessions",
        )?;
        let mut sessions: Vec<Session> = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let created_at: String = row.get(1)?;
                let last_updated: String = row.get(2)?;
                let state: String = row.get(3)?;
                let metadata: String = row.get(4)?;
                Ok((id, created_at, last_updated, state, metadata))
            })?
            .filter_map(|row| row.ok())
            .filter_map(|(id, created_at, last_updated, state, metadata)| {
                Some(Session {
                    id,
                    created_at: created_at.parse().ok()?,
                    last_updated: last_updated.parse().ok()?,
                    history: Vec::new(),
                    state: serde_json::from_str(&state).ok()?,
                    metadata: serde_json::from_str(&metadata).ok()?,
                })
            })
            .collect();

        let mut stmt = conn.prepare(
            "SELECT session_id, event_id, event_type, timestamp, details
             FROM session_events ORDER BY id ASC",
        )?;
        let events: Vec<(String, SessionEvent)> = stmt
            .query_map([], |row| {
                let session_id: String = row.get(0)?;
                let event_id: String = row.get(1)?;
                let event_type: String = row.get(2)?;
                let timestamp: String = row.get(3)?;
                let details: String = row.get(4)?;
                Ok((session_id, event_id, event_type, timestamp, details))
            })?
            .filter_map(|row| row.ok())
            .filter_map(|(session_id, event_id, event_type, timestamp, details)| {
                Some((
                    session_id,
                    SessionEvent {
                        event_id,
                        event_type,
                        timestamp: timestamp.parse().ok()?,
                        details: serde_json::from_str(&details).ok()?,
                    },
                ))
            })
            .collect();

        for (session_id, event) in events {
            if let Some(session) = sessions.iter_mut().find(|s| s.id == session_id) {
                session.history.push(event);
            }
        }

        Ok(sessions)
    }
}
