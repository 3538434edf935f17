//! Push-stream envelope types and parser.
//!
//! The server broadcasts JSON messages with the shape
//! `{"action": "<kind>", "payload": {...}}`. The stream client does not
//! interpret payloads; subscribers route on [`Envelope::action`].

use serde::{Deserialize, Serialize};

use solasola_core::task::{LogEntry, TaskStatus};
use solasola_core::types::{ClientId, RepoId, TaskId};

/// Known envelope kinds. Anything else parses as [`Action::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Install lifecycle change (started, failed, cancelled).
    StatusUpdate,
    /// Install progress, meaningful to the actor only.
    ProgressUpdate,
    /// Resource list changed; re-fetch or reconcile.
    RefreshAll,
    /// New task log entries, forwarded to the hosting frame.
    LogUpdate,
    #[serde(other)]
    Other,
}

/// Union of every field the server puts in a payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Payload {
    pub actor_client_id: Option<ClientId>,
    pub task_id: Option<TaskId>,
    pub repo_id: Option<RepoId>,
    pub manifest_id: Option<String>,
    pub ui_container_id: Option<String>,
    pub deletion_path: Option<String>,
    pub status: Option<TaskStatus>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    /// `log_update`: 1-based sequence position of `logs[0]`.
    pub offset: Option<u64>,
    /// `log_update`: the new entries.
    pub logs: Vec<LogEntry>,
}

impl Payload {
    pub fn task_id(&self) -> Option<&str> {
        non_empty(&self.task_id)
    }

    pub fn repo_id(&self) -> Option<&str> {
        non_empty(&self.repo_id)
    }

    pub fn ui_container_id(&self) -> Option<&str> {
        non_empty(&self.ui_container_id)
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    /// `true` when the payload was produced by the tab owning `client_id`.
    pub fn is_from(&self, client_id: &str) -> bool {
        self.actor_client_id.as_deref() == Some(client_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: Action,
    #[serde(default)]
    pub payload: Payload,
}

impl Envelope {
    pub fn new(action: Action, payload: Payload) -> Self {
        Self { action, payload }
    }
}

/// Parse one push-stream message.
///
/// Returns `Err` for malformed JSON. Callers should log and continue.
pub fn parse_envelope(text: &str) -> Result<Envelope, serde_json::Error> {
    serde_json::from_str(text)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_install_started() {
        let json = r#"{"action":"status_update","payload":{"actor_client_id":"tab-a","task_id":"t-1","repo_id":"org/genre","manifest_id":"","ui_container_id":"feature_models","deletion_path":"","status":"running","progress":0,"message":"Installation started."}}"#;
        let env = parse_envelope(json).unwrap();
        assert_eq!(env.action, Action::StatusUpdate);
        assert_eq!(env.payload.status, Some(TaskStatus::Running));
        assert!(env.payload.is_from("tab-a"));
        assert!(!env.payload.is_from("tab-b"));
        assert_eq!(env.payload.repo_id(), Some("org/genre"));
    }

    #[test]
    fn parse_refresh_all_with_null_container() {
        let json = r#"{"action":"refresh_all","payload":{"ui_container_id":null,"status":"completed","progress":100,"message":"A model was deleted."}}"#;
        let env = parse_envelope(json).unwrap();
        assert_eq!(env.action, Action::RefreshAll);
        assert_eq!(env.payload.ui_container_id(), None);
    }

    #[test]
    fn empty_strings_read_as_absent() {
        let env = parse_envelope(r#"{"action":"progress_update","payload":{"task_id":"","progress":42.5}}"#).unwrap();
        assert_eq!(env.payload.task_id(), None);
        assert_eq!(env.payload.progress, Some(42.5));
    }

    #[test]
    fn parse_log_update() {
        let json = r#"{"action":"log_update","payload":{"task_id":"t-9","offset":3,"logs":[{"message":"Separating stems","type":"info"}]}}"#;
        let env = parse_envelope(json).unwrap();
        assert_eq!(env.payload.offset, Some(3));
        assert_eq!(env.payload.logs[0].message, "Separating stems");
    }

    #[test]
    fn unknown_action_is_kept() {
        let env = parse_envelope(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(env.action, Action::Other);
        assert_eq!(env.payload, Payload::default());
    }

    #[test]
    fn malformed_json_is_error() {
        assert!(parse_envelope("not json").is_err());
    }
}
