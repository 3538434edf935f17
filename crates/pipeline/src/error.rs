use solasola_client::ApiError;
use solasola_core::error::CoreError;

use crate::events::LifecycleState;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Cannot start a task while {0}")]
    Busy(LifecycleState),

    #[error("No task is being tracked")]
    NoActiveTask,

    #[error("Progress layout unavailable after {attempts} attempts")]
    LayoutUnavailable { attempts: u32 },

    #[error("Invalid host origin: {0}")]
    InvalidOrigin(String),

    #[error("Task tracking was shut down")]
    Shutdown,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<PipelineError> for CoreError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Api(e) => e.into(),
            PipelineError::Core(e) => e,
            PipelineError::Busy(_) => CoreError::Conflict(err.to_string()),
            PipelineError::InvalidOrigin(_) => CoreError::Validation(err.to_string()),
            PipelineError::LayoutUnavailable { .. } => CoreError::NotFound {
                entity: "layout",
                id: String::new(),
            },
            PipelineError::NoActiveTask | PipelineError::Shutdown => {
                CoreError::Internal(err.to_string())
            }
        }
    }
}
