//! Shared-resource (model) install coordination for one tab.
//!
//! The server holds the only install lock. [`InstallCoordinator`] keeps an
//! optimistic, always-overwritable projection per repo id and reconciles
//! it against push-stream broadcasts from whichever tab is the actor.

pub mod coordinator;
pub mod error;
pub mod view;

pub use coordinator::InstallCoordinator;
pub use error::InstallError;
pub use view::{InstallViewEvent, ResourceState, ResourceView};
