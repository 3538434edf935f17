//! Typed HTTP client for the SolaSola server.
//!
//! [`SolaSolaApi`] wraps every REST endpoint the tab talks to. The
//! [`backend`] traits are the seams the lifecycle manager and install
//! coordinator depend on, so they can be driven by fakes in tests.

pub mod api;
pub mod backend;

pub use api::{ApiError, HealthReport, ProcessingMode, SolaSolaApi, SubmitRequest, UploadFile};
pub use backend::{ModelBackend, TaskBackend};
