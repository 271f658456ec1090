use crate::state::TransitionError;
use crun_docker::DockerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Docker(#[from] DockerError),

    #[error("container {container} is busy")]
    Busy { container: String },

    #[error("operation queue full for {container} (depth {depth})")]
    QueueFull { container: String, depth: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl OrchestratorError {
    /// The daemon's status code, when the failure was a rejection.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            OrchestratorError::Docker(e) => e.status_code(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
