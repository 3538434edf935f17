//! Trait seams between the managers and the HTTP client.
//!
//! [`SolaSolaApi`] implements both traits; tests substitute in-memory
//! fakes to script server behaviour.

use async_trait::async_trait;

use solasola_core::install::{ManageRequest, ManageResponse, ModelsStatus};
use solasola_core::layout::ProgressLayout;
use solasola_core::task::TaskSnapshot;
use solasola_core::types::TaskId;

use crate::api::{ApiError, SolaSolaApi, SubmitRequest};

/// Server operations needed to drive one long-running task.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    async fn submit(&self, request: SubmitRequest) -> Result<TaskId, ApiError>;

    async fn status(&self, task_id: &str) -> Result<TaskSnapshot, ApiError>;

    /// Fails with [`ApiError::NotFound`] until the layout is generated.
    async fn layout(&self, task_id: &str) -> Result<ProgressLayout, ApiError>;

    async fn cancel(&self, task_id: &str) -> Result<(), ApiError>;
}

/// Server operations on shared installable models.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn models_status(&self) -> Result<ModelsStatus, ApiError>;

    async fn refresh_models_status(&self) -> Result<ModelsStatus, ApiError>;

    async fn manage_model(
        &self,
        client_id: &str,
        request: &ManageRequest,
    ) -> Result<ManageResponse, ApiError>;
}

#[async_trait]
impl TaskBackend for SolaSolaApi {
    async fn submit(&self, request: SubmitRequest) -> Result<TaskId, ApiError> {
        SolaSolaApi::submit(self, request).await
    }

    async fn status(&self, task_id: &str) -> Result<TaskSnapshot, ApiError> {
        SolaSolaApi::status(self, task_id).await
    }

    async fn layout(&self, task_id: &str) -> Result<ProgressLayout, ApiError> {
        SolaSolaApi::layout(self, task_id).await
    }

    async fn cancel(&self, task_id: &str) -> Result<(), ApiError> {
        SolaSolaApi::cancel(self, task_id).await
    }
}

#[async_trait]
impl ModelBackend for SolaSolaApi {
    async fn models_status(&self) -> Result<ModelsStatus, ApiError> {
        SolaSolaApi::models_status(self).await
    }

    async fn refresh_models_status(&self) -> Result<ModelsStatus, ApiError> {
        SolaSolaApi::refresh_models_status(self).await
    }

    async fn manage_model(
        &self,
        client_id: &str,
        request: &ManageRequest,
    ) -> Result<ManageResponse, ApiError> {
        SolaSolaApi::manage_model(self, client_id, request).await
    }
}
