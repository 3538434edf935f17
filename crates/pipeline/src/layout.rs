//! Progress layout fetch with a fixed-backoff retry.
//!
//! The server generates a task's layout shortly after the task is
//! created, so the first requests may answer 404. Only "not found" is
//! retried; any other failure aborts at once.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use solasola_client::TaskBackend;
use solasola_core::config::PollingConfig;
use solasola_core::layout::ProgressLayout;

use crate::error::PipelineError;

/// Retry parameters for [`fetch_layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutRetry {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for LayoutRetry {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for LayoutRetry {
    fn from(config: &PollingConfig) -> Self {
        Self {
            max_attempts: config.layout_max_attempts.max(1),
            backoff: Duration::from_millis(config.layout_backoff_ms),
        }
    }
}

/// Fetch and validate the layout for `task_id`.
pub async fn fetch_layout(
    backend: &dyn TaskBackend,
    task_id: &str,
    retry: &LayoutRetry,
    cancel: &CancellationToken,
) -> Result<ProgressLayout, PipelineError> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Shutdown),
            result = backend.layout(task_id) => result,
        };

        match result {
            Ok(layout) => {
                layout.validate()?;
                tracing::debug!(task_id, attempt, stages = layout.stages.len(), "Layout received");
                return Ok(layout);
            }
            Err(e) if e.is_not_found() => {
                if attempt >= retry.max_attempts {
                    tracing::warn!(task_id, attempt, "Layout still missing, giving up");
                    return Err(PipelineError::LayoutUnavailable { attempts: attempt });
                }
                tracing::debug!(task_id, attempt, "Layout not ready yet");
            }
            Err(e) => {
                tracing::error!(task_id, attempt, error = %e, "Layout fetch failed");
                return Err(e.into());
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Shutdown),
            _ = tokio::time::sleep(retry.backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use solasola_client::{ApiError, SubmitRequest};
    use solasola_core::error::CoreError;
    use solasola_core::layout::StageSpec;
    use solasola_core::task::TaskSnapshot;
    use solasola_core::types::TaskId;

    /// Answers 404 for the first `misses` layout calls.
    struct LateLayout {
        misses: u32,
        calls: AtomicU32,
        fail_with: Option<u16>,
    }

    impl LateLayout {
        fn new(misses: u32) -> Self {
            Self {
                misses,
                calls: AtomicU32::new(0),
                fail_with: None,
            }
        }
    }

    #[async_trait]
    impl TaskBackend for LateLayout {
        async fn submit(&self, _request: SubmitRequest) -> Result<TaskId, ApiError> {
            unreachable!()
        }

        async fn status(&self, _task_id: &str) -> Result<TaskSnapshot, ApiError> {
            unreachable!()
        }

        async fn layout(&self, _task_id: &str) -> Result<ProgressLayout, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(status) = self.fail_with {
                return Err(ApiError::Status {
                    status,
                    body: "boom".into(),
                });
            }
            if n <= self.misses {
                return Err(ApiError::NotFound {
                    resource: "layout".into(),
                });
            }
            Ok(ProgressLayout::new(vec![StageSpec::new("Only", 1.0, 1)]))
        }

        async fn cancel(&self, _task_id: &str) -> Result<(), ApiError> {
            unreachable!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_not_found_with_fixed_backoff() {
        let backend = LateLayout::new(3);
        let start = tokio::time::Instant::now();

        let layout = fetch_layout(&backend, "t", &LayoutRetry::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(layout.stages.len(), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let backend = LateLayout::new(u32::MAX);
        let start = tokio::time::Instant::now();

        let result =
            fetch_layout(&backend, "t", &LayoutRetry::default(), &CancellationToken::new()).await;

        assert_matches!(result, Err(PipelineError::LayoutUnavailable { attempts: 5 }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_abort_immediately() {
        let mut backend = LateLayout::new(0);
        backend.fail_with = Some(500);

        let result =
            fetch_layout(&backend, "t", &LayoutRetry::default(), &CancellationToken::new()).await;

        assert_matches!(result, Err(PipelineError::Api(ApiError::Status { status: 500, .. })));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unrenderable_layout_is_rejected() {
        struct EmptyLayout;

        #[async_trait]
        impl TaskBackend for EmptyLayout {
            async fn submit(&self, _request: SubmitRequest) -> Result<TaskId, ApiError> {
                unreachable!()
            }
            async fn status(&self, _task_id: &str) -> Result<TaskSnapshot, ApiError> {
                unreachable!()
            }
            async fn layout(&self, _task_id: &str) -> Result<ProgressLayout, ApiError> {
                Ok(ProgressLayout::new(Vec::new()))
            }
            async fn cancel(&self, _task_id: &str) -> Result<(), ApiError> {
                unreachable!()
            }
        }

        let result =
            fetch_layout(&EmptyLayout, "t", &LayoutRetry::default(), &CancellationToken::new())
                .await;
        assert_matches!(result, Err(PipelineError::Core(CoreError::Validation(_))));
    }
}
