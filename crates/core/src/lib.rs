//! Pure domain layer for the SolaSola client orchestration stack.
//!
//! Holds the shared identifiers, the error taxonomy, the task / log /
//! layout wire types, progress arithmetic, install-progress arithmetic,
//! client configuration and the pre-submission integrity policy.
//! Nothing in here performs network I/O.

pub mod config;
pub mod error;
pub mod install;
pub mod integrity;
pub mod layout;
pub mod progress;
pub mod task;
pub mod types;
