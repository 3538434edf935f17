//! Toast value types shared by the scheduler and its renderers.

use serde::Serialize;

use solasola_core::task::{LogEntry, LogTarget, Severity};

/// Milliseconds on the queue's own timeline.
pub type Millis = u64;

pub type ToastId = u64;

/// Height assumed for a toast until the renderer reports one.
pub const DEFAULT_TOAST_HEIGHT_PX: f64 = 56.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastState {
    Queued,
    Visible,
    /// Expired or dismissed; no longer holds a slot.
    Fading,
    Removed,
}

/// What a caller hands to the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastRequest {
    pub message: String,
    pub severity: Severity,
    pub icon: Option<String>,
    /// `None` uses the configured default; `Some(0)` never expires.
    pub duration_ms: Option<u64>,
    pub target: LogTarget,
}

impl ToastRequest {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            icon: None,
            duration_ms: None,
            target: LogTarget::Toast,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn persistent(self) -> Self {
        self.with_duration(0)
    }

    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }
}

impl From<&LogEntry> for ToastRequest {
    fn from(entry: &LogEntry) -> Self {
        Self {
            message: entry.message.clone(),
            severity: entry.severity,
            icon: entry.icon.clone(),
            duration_ms: None,
            target: entry.target,
        }
    }
}

/// A toast as the scheduler tracks it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToastInstance {
    pub id: ToastId,
    pub message: String,
    pub severity: Severity,
    pub icon: Option<String>,
    /// Resolved lifetime; `0` means persistent.
    pub duration_ms: u64,
    pub state: ToastState,
    /// Distance from the bottom of the stack.
    pub offset_px: f64,
    pub height_px: f64,
    /// Delay before the renderer reveals or moves the toast.
    pub reveal_delay_ms: u64,
    pub admitted_at: Option<Millis>,
}

impl ToastInstance {
    pub fn is_persistent(&self) -> bool {
        self.duration_ms == 0
    }
}

/// Changes a renderer needs to apply, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToastEvent {
    Shown { toast: ToastInstance },
    Moved { id: ToastId, offset_px: f64, reveal_delay_ms: u64 },
    Fading { id: ToastId, at: Millis },
    Removed { id: ToastId },
    Cleared,
}
