//! Persistent log: every entry routed to the log, kept in session storage.
//!
//! Independent of toast visibility. Capped; the oldest entries are dropped
//! first. Storage failures are logged and never surface to callers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use solasola_core::task::{LogEntry, Severity};
use solasola_session::store::{load_json, save_json};
use solasola_session::SessionStore;

const STORAGE_KEY: &str = "persistentLog";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub icon: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn from_entry(entry: &LogEntry) -> Self {
        let timestamp = entry
            .timestamp
            .and_then(|secs| {
                DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
            })
            .unwrap_or_else(Utc::now);
        Self {
            message: entry.message.clone(),
            severity: entry.severity,
            icon: entry.icon.clone(),
            timestamp,
        }
    }

    /// `[HH:MM:SS] message`
    pub fn to_line(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

pub struct PersistentLog {
    store: Arc<dyn SessionStore>,
    cap: usize,
    records: Mutex<VecDeque<LogRecord>>,
}

impl PersistentLog {
    /// Open the log, restoring whatever this tab stored before.
    pub fn open(store: Arc<dyn SessionStore>, cap: usize) -> Self {
        let log = Self {
            store,
            cap,
            records: Mutex::new(VecDeque::new()),
        };
        log.refresh();
        log
    }

    pub fn append(&self, entry: &LogEntry) {
        let mut records = self.records();
        records.push_back(LogRecord::from_entry(entry));
        while records.len() > self.cap {
            records.pop_front();
        }
        self.persist(&records);
    }

    pub fn clear(&self) {
        self.records().clear();
        if let Err(e) = self.store.remove(STORAGE_KEY) {
            tracing::warn!(error = %e, "Failed to clear persistent log");
        }
    }

    /// Plain-text copy, one line per entry, oldest first.
    pub fn copy(&self) -> String {
        self.records()
            .iter()
            .map(LogRecord::to_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Reload from session storage and return the entries.
    pub fn refresh(&self) -> Vec<LogRecord> {
        let stored: Vec<LogRecord> = match load_json(self.store.as_ref(), STORAGE_KEY) {
            Ok(records) => records.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load persistent log");
                Vec::new()
            }
        };
        let skip = stored.len().saturating_sub(self.cap);
        let mut records = self.records();
        *records = stored.into_iter().skip(skip).collect();
        records.iter().cloned().collect()
    }

    pub fn entries(&self) -> Vec<LogRecord> {
        self.records().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    // ---- private helpers ----

    fn records(&self) -> MutexGuard<'_, VecDeque<LogRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, records: &VecDeque<LogRecord>) {
        if let Err(e) = save_json(self.store.as_ref(), STORAGE_KEY, records) {
            tracing::warn!(error = %e, "Failed to persist log");
        }
    }
}
