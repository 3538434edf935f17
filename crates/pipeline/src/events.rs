//! View-level events emitted by the task lifecycle manager.
//!
//! A front-end subscribes with [`TaskLifecycleManager::subscribe`] and
//! renders these; it never inspects server responses directly.
//!
//! [`TaskLifecycleManager::subscribe`]: crate::TaskLifecycleManager::subscribe

use std::fmt;

use serde::Serialize;

use solasola_core::progress::ProgressFrame;
use solasola_core::task::SequencedLog;
use solasola_core::types::TaskId;

/// Where the manager is in a task's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Submitting,
    AwaitingLayout,
    Polling,
    Completed,
    Failed,
    Cancelled,
}

impl LifecycleState {
    /// `true` while a task is being submitted or tracked.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            LifecycleState::Submitting | LifecycleState::AwaitingLayout | LifecycleState::Polling
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::Completed | LifecycleState::Failed | LifecycleState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Submitting => "submitting",
            LifecycleState::AwaitingLayout => "awaiting_layout",
            LifecycleState::Polling => "polling",
            LifecycleState::Completed => "completed",
            LifecycleState::Failed => "failed",
            LifecycleState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskViewEvent {
    StateChanged { state: LifecycleState },

    /// Tracking started for `task_id` (fresh submission or resumption).
    Tracking { task_id: TaskId, resumed: bool },

    /// Rendered progress after a poll.
    Progress { frame: ProgressFrame },

    /// A log entry not displayed before.
    Log { log: SequencedLog },

    /// Cancellation was requested; the terminal state comes from polling.
    Cancelling,

    Completed { results: serde_json::Value },

    /// Failed, or completed without results.
    Failed { message: String },

    Cancelled,

    /// The server no longer knows the task.
    TaskVanished,

    /// Nothing to resume; the front-end should go back to its start view.
    RedirectHome,

    /// The progress layout never became available.
    LayoutFailed { message: String },
}
