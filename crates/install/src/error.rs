use solasola_client::ApiError;
use solasola_core::error::CoreError;
use solasola_core::types::RepoId;

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Unknown model: {0}")]
    UnknownResource(RepoId),

    #[error("Model is not installed: {0}")]
    NotInstalled(RepoId),

    #[error("This tab is not installing {0}")]
    NotActor(RepoId),

    #[error("Already installing {0}")]
    AlreadyInstalling(RepoId),

    #[error("Server refused the request: {0}")]
    Refused(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<InstallError> for CoreError {
    fn from(err: InstallError) -> Self {
        match err {
            InstallError::Api(e) => e.into(),
            InstallError::UnknownResource(id) | InstallError::NotInstalled(id) => {
                CoreError::NotFound { entity: "model", id }
            }
            InstallError::AlreadyInstalling(_) => CoreError::Conflict(err.to_string()),
            InstallError::NotActor(_) | InstallError::Refused(_) => {
                CoreError::Validation(err.to_string())
            }
        }
    }
}
