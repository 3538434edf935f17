//! Task lifecycle for one tab.
//!
//! [`TaskLifecycleManager`] drives a long-running server task from
//! submission (or resumption after a reload) through layout fetch and
//! status polling to a terminal state. Polling is the source of truth for
//! status and progress; push-stream `log_update` frames are only forwarded
//! to the hosting frame.

pub mod error;
pub mod events;
pub mod frame;
pub mod layout;
pub mod manager;

pub use error::PipelineError;
pub use events::{LifecycleState, TaskViewEvent};
pub use frame::{HostFrame, HostMessage, HostPost};
pub use layout::{fetch_layout, LayoutRetry};
pub use manager::TaskLifecycleManager;
