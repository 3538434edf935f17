//! Per-tab short-lived storage.
//!
//! - [`SessionStore`]: string key/value storage scoped to one tab, with
//!   an in-memory and a file-backed implementation.
//! - [`TabContext`]: the tab's identity and current task id, loaded and
//!   persisted through a [`SessionStore`].

pub mod context;
pub mod store;

pub use context::TabContext;
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoreError};
