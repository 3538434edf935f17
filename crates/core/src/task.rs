//! Task projection types as returned by the status endpoint, plus the
//! sequence cursor used to avoid re-displaying log entries.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Server-side lifecycle of a task.
///
/// The server reports `starting` before the worker thread first updates
/// the task; it is folded into [`TaskStatus::Pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[serde(alias = "starting")]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// `true` for statuses after which the server never mutates the task.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Log entries
// ---------------------------------------------------------------------------

/// Severity of a user-facing message. Unknown values read as `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    #[serde(alias = "warn")]
    Warning,
    Error,
    #[default]
    #[serde(other)]
    Info,
}

/// Where a log entry should be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogTarget {
    Toast,
    #[serde(alias = "persistent-log", alias = "persistent_log")]
    Log,
    #[default]
    Both,
}

impl LogTarget {
    pub fn shows_toast(self) -> bool {
        matches!(self, LogTarget::Toast | LogTarget::Both)
    }

    pub fn records_log(self) -> bool {
        matches!(self, LogTarget::Log | LogTarget::Both)
    }
}

/// One entry of a task's append-only `ui_logs` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(alias = "text")]
    pub message: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(rename = "type", default)]
    pub severity: Severity,
    #[serde(default)]
    pub target: LogTarget,
    /// Seconds since the epoch, as stamped by the server.
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            icon: None,
            severity,
            target: LogTarget::Both,
            timestamp: None,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }
}

/// A log entry paired with its 1-based sequence position within the task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequencedLog {
    pub seq: u64,
    pub entry: LogEntry,
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Position reported by the server inside the progress layout.
///
/// Both indices are 1-based; `0` means "not started".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressDetails {
    #[serde(default)]
    pub stage_index: u32,
    #[serde(default)]
    pub sub_stage_index: u32,
    #[serde(default)]
    pub sub_stage_progress: f64,
}

/// Read-only projection of a task returned by `GET /status/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    #[serde(default)]
    pub current_step: String,
    #[serde(default)]
    pub progress_details: ProgressDetails,
    #[serde(default)]
    pub ui_logs: Vec<LogEntry>,
    #[serde(default)]
    pub results: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Log cursor
// ---------------------------------------------------------------------------

/// Remembers the highest sequence position already displayed for a task.
///
/// Both the poll path and the push path feed entries through the same
/// cursor, so an entry is displayed at most once per task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCursor {
    last_seen: u64,
}

impl LogCursor {
    pub fn new(last_seen: u64) -> Self {
        Self { last_seen }
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Return the entries of `logs` that have not been seen yet.
    ///
    /// `offset` is the sequence position of `logs[0]` (1 for a full
    /// `ui_logs` list).
    pub fn advance(&mut self, logs: &[LogEntry], offset: u64) -> Vec<SequencedLog> {
        let offset = offset.max(1);
        let fresh: Vec<SequencedLog> = logs
            .iter()
            .enumerate()
            .map(|(i, entry)| SequencedLog {
                seq: offset + i as u64,
                entry: entry.clone(),
            })
            .filter(|log| log.seq > self.last_seen)
            .collect();

        if let Some(last) = fresh.last() {
            self.last_seen = last.seq;
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_reads_as_pending() {
        let status: TaskStatus = serde_json::from_str(r#""starting""#).unwrap();
        assert_eq!(status, TaskStatus::Pending);
        assert!(!status.is_terminal());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn parse_snapshot_with_empty_progress_details() {
        let json = r#"{"status":"running","progress_details":{},"current_step":"Initializing...","ui_logs":[]}"#;
        let snap: TaskSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.status, TaskStatus::Running);
        assert_eq!(snap.progress_details, ProgressDetails::default());
        assert!(snap.results.is_none());
    }

    #[test]
    fn parse_log_entry_wire_form() {
        let json = r#"{"message":"Downloading model...","icon":"download","type":"info","target":"toast","timestamp":1700000000.5}"#;
        let entry: LogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.icon.as_deref(), Some("download"));
        assert_eq!(entry.target, LogTarget::Toast);
        assert!(entry.target.shows_toast());
        assert!(!entry.target.records_log());
    }

    #[test]
    fn unknown_severity_reads_as_info() {
        let entry: LogEntry = serde_json::from_str(r#"{"text":"x","type":"tune"}"#).unwrap();
        assert_eq!(entry.severity, Severity::Info);
        assert_eq!(entry.target, LogTarget::Both);
    }

    #[test]
    fn severity_names_round_trip() {
        for (raw, severity) in [
            ("\"info\"", Severity::Info),
            ("\"success\"", Severity::Success),
            ("\"warn\"", Severity::Warning),
            ("\"warning\"", Severity::Warning),
            ("\"error\"", Severity::Error),
        ] {
            assert_eq!(serde_json::from_str::<Severity>(raw).unwrap(), severity);
        }
        assert_eq!(serde_json::to_string(&Severity::Info).unwrap(), "\"info\"");
        assert_eq!(Severity::default(), Severity::Info);
    }

    #[test]
    fn cursor_skips_seen_entries() {
        let logs: Vec<LogEntry> = (1..=3)
            .map(|i| LogEntry::new(format!("m{i}"), Severity::Info))
            .collect();
        let mut cursor = LogCursor::default();

        let first = cursor.advance(&logs[..2], 1);
        assert_eq!(first.len(), 2);
        assert_eq!(cursor.last_seen(), 2);

        let second = cursor.advance(&logs, 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].seq, 3);
        assert_eq!(second[0].entry.message, "m3");

        assert!(cursor.advance(&logs, 1).is_empty());
    }

    #[test]
    fn cursor_with_offset_from_push_path() {
        let mut cursor = LogCursor::new(4);
        let pushed = vec![
            LogEntry::new("old", Severity::Info),
            LogEntry::new("new", Severity::Success),
        ];
        let fresh = cursor.advance(&pushed, 4);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].seq, 5);
        assert_eq!(cursor.last_seen(), 5);
    }
}
