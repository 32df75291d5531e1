//! Append-only audit trail.
//!
//! Records are buffered in memory and flushed to a JSON-lines file once the
//! batch threshold is reached. A failed flush keeps the buffer intact for
//! retry; records are never rewritten.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default number of buffered records before an automatic flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
    /// Acting agent id ("unknown" when identity could not be resolved).
    pub agent_id: String,
    /// Action name, e.g. "authenticate", "authorize", "skill_call".
    pub action: String,
    /// Target resource string.
    pub resource: String,
    /// "success" or "failure".
    pub result: String,
    /// Free-form detail. Full failure reasons live here, never in
    /// user-visible error messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Buffered append-only audit log.
pub struct AuditLog {
    path: PathBuf,
    batch_size: usize,
    buffer: Mutex<Vec<AuditRecord>>,
}

impl AuditLog {
    /// Create an audit log writing to `path` with the default batch size.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_batch_size(path, DEFAULT_BATCH_SIZE)
    }

    /// Create an audit log with an explicit batch size.
    pub fn with_batch_size(path: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            path: path.into(),
            batch_size: batch_size.max(1),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Append a record to the buffer, flushing if the batch threshold is
    /// reached.
    pub fn record(
        &self,
        agent_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        result: impl Into<String>,
        details: Option<Value>,
    ) {
        let entry = AuditRecord {
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            action: action.into(),
            resource: resource.into(),
            result: result.into(),
            details,
        };

        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.push(entry);
            buffer.len() >= self.batch_size
        };
        if should_flush {
            self.flush();
        }
    }

    /// Flush buffered records to the log file. On write failure the buffer
    /// is retained so no record is lost.
    pub fn flush(&self) {
        let mut buffer = self.buffer.lock();
        if buffer.is_empty() {
            return;
        }

        let mut lines = String::new();
        for entry in buffer.iter() {
            match serde_json::to_string(entry) {
                Ok(line) => {
                    lines.push_str(&line);
                    lines.push('\n');
                }
                Err(e) => log::error!("Failed to serialize audit record: {}", e),
            }
        }

        match append_to_file(&self.path, &lines) {
            Ok(()) => {
                log::debug!("Audit log flushed {} records to {:?}", buffer.len(), self.path);
                buffer.clear();
            }
            Err(e) => {
                log::error!("Failed to flush audit log, retaining buffer: {}", e);
            }
        }
    }

    /// Number of records currently buffered (unflushed).
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Search flushed records with optional agent, action, and time filters.
    pub fn search(
        &self,
        agent_id: Option<&str>,
        action: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<AuditRecord> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Audit log file not readable: {}", e);
                return Vec::new();
            }
        };

        content
            .lines()
            .filter_map(|line| serde_json::from_str::<AuditRecord>(line).ok())
            .filter(|entry| agent_id.map_or(true, |id| entry.agent_id == id))
            .filter(|entry| action.map_or(true, |a| entry.action == a))
            .filter(|entry| start.map_or(true, |t| entry.timestamp >= t))
            .filter(|entry| end.map_or(true, |t| entry.timestamp <= t))
            .collect()
    }
}

fn append_to_file(path: &Path, data: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(data.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_records_buffer_until_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let audit = AuditLog::with_batch_size(&path, 3);

        audit.record("menu", "authorize", "agent:menu:lookup", "success", None);
        audit.record("menu", "authorize", "agent:menu:lookup", "success", None);
        assert_eq!(audit.buffered(), 2);
        assert!(!path.exists());

        audit.record("menu", "authorize", "agent:menu:lookup", "failure", None);
        assert_eq!(audit.buffered(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_flush_writes_json_lines_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let audit = AuditLog::with_batch_size(&path, 100);

        audit.record("a", "authenticate", "token", "success", None);
        audit.record("b", "authorize", "agent:menu:lookup", "failure", None);
        audit.flush();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.agent_id, "a");
        let second: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.result, "failure");
    }

    #[test]
    fn test_flush_failure_retains_buffer() {
        // A directory path cannot be opened for append.
        let dir = tempdir().unwrap();
        let audit = AuditLog::with_batch_size(dir.path(), 100);
        audit.record("a", "authenticate", "token", "success", None);
        audit.flush();
        assert_eq!(audit.buffered(), 1);
    }

    #[test]
    fn test_search_filters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let audit = AuditLog::with_batch_size(&path, 100);

        audit.record("menu", "skill_call", "agent:menu:lookup", "success", None);
        audit.record("orders", "skill_call", "agent:orders:history", "success", None);
        audit.record("menu", "authenticate", "token", "failure", None);
        audit.flush();

        assert_eq!(audit.search(Some("menu"), None, None, None).len(), 2);
        assert_eq!(audit.search(Some("menu"), Some("skill_call"), None, None).len(), 1);
        assert_eq!(audit.search(None, None, None, None).len(), 3);
    }
}
