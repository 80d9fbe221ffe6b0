//! Append-only audit trail
//!
//! One JSON object per line in a daily-rotated file under the audit
//! directory. Entries are never rewritten.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::errors::OrchestratorError;

/// A single audit entry as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Daily-rotated JSON-lines writer
pub struct AuditTrail {
    writer: Mutex<RollingFileAppender>,
}

impl AuditTrail {
    /// Open (or create) the trail in `dir`
    pub fn open(dir: &Path) -> Result<Self, OrchestratorError> {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("audit")
            .filename_suffix("jsonl")
            .build(dir)
            .map_err(|e| OrchestratorError::StorageError(e.to_string()))?;

        Ok(Self {
            writer: Mutex::new(appender),
        })
    }

    /// Append an entry of `kind` carrying `payload`
    pub fn record<T: Serialize>(&self, kind: &str, payload: &T) -> Result<(), OrchestratorError> {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            payload: serde_json::to_value(payload)?,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let trail = AuditTrail::open(dir.path()).unwrap();

        trail.record("phase", &serde_json::json!({"phase": "CLEANUP"})).unwrap();
        trail.record("alert", &serde_json::json!({"service": "redis"})).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(files.len(), 1);

        let contents = std::fs::read_to_string(files[0].path()).unwrap();
        let entries: Vec<AuditEntry> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, "phase");
        assert_eq!(entries[1].payload["service"], "redis");
    }
}
