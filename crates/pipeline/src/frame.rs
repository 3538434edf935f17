//! Bridge to the frame hosting the processing view.
//!
//! When the processing view is embedded, the host receives new log
//! entries (`{type: "log_update", logs}`) and the final outcome
//! (`{status, results}`). Every post is addressed to the single origin
//! configured for the host; nothing is sent to a wildcard target.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use solasola_core::task::{LogEntry, TaskStatus};

use crate::error::PipelineError;

static ORIGIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?)://([a-z0-9.-]+|\[[0-9a-f:]+\])(:\d{1,5})?$").expect("valid regex")
});

/// Message for the hosting frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    LogUpdate {
        logs: Vec<LogEntry>,
    },
    Status {
        status: TaskStatus,
        results: Option<serde_json::Value>,
        /// Set when the view aborted before the task finished.
        error: Option<String>,
    },
}

impl HostMessage {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            HostMessage::LogUpdate { logs } => json!({ "type": "log_update", "logs": logs }),
            HostMessage::Status {
                status,
                results,
                error,
            } => {
                let mut body = json!({ "status": status, "results": results });
                if let Some(error) = error {
                    body["error"] = json!(error);
                }
                body
            }
        }
    }
}

/// A message addressed to a target origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostPost {
    pub target_origin: String,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct HostFrame {
    origin: String,
    tx: mpsc::UnboundedSender<HostPost>,
}

impl HostFrame {
    /// Create a bridge to `origin` and the receiving end the host reads.
    pub fn channel(origin: &str) -> Result<(Self, mpsc::UnboundedReceiver<HostPost>), PipelineError> {
        let origin = normalize_origin(origin)?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((Self { origin, tx }, rx))
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn post(&self, message: &HostMessage) {
        let post = HostPost {
            target_origin: self.origin.clone(),
            body: message.to_json(),
        };
        if self.tx.send(post).is_err() {
            tracing::debug!(origin = %self.origin, "Host frame is gone, dropping message");
        }
    }
}

/// Lower-case `scheme://host[:port]`, without a trailing slash.
fn normalize_origin(origin: &str) -> Result<String, PipelineError> {
    let normalized = origin.trim().trim_end_matches('/').to_ascii_lowercase();
    if ORIGIN_RE.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(PipelineError::InvalidOrigin(origin.to_string()))
    }
}
