//! Notification queue for one tab.
//!
//! - [`ToastScheduler`]: pure backlog / visible-set state machine driven
//!   by explicit millisecond timestamps, so every timer rule is testable
//!   without a runtime.
//! - [`NotificationQueue`]: async driver that feeds the scheduler from
//!   tokio time and publishes [`ToastEvent`]s to renderers.
//! - [`PersistentLog`]: capped log of every entry routed to the log,
//!   stored in the tab's session storage.

pub mod log;
pub mod scheduler;
pub mod service;
pub mod toast;

pub use log::{LogRecord, PersistentLog};
pub use scheduler::ToastScheduler;
pub use service::NotificationQueue;
pub use toast::{Millis, ToastEvent, ToastId, ToastInstance, ToastRequest, ToastState};
