//! Error types for Gantry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Workflow validation errors
    #[error("Cycle detected in job dependencies")]
    CyclicDependency,

    #[error("Unknown job dependency: {0}")]
    UnknownDependency(String),

    #[error("Duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("Workflow has no jobs")]
    EmptyWorkflow,

    // Job-local errors
    #[error("Unknown context: {0}")]
    UnknownContext(String),

    #[error("Command exited with code {exit_code}")]
    ExecutionFailure { exit_code: i32 },

    #[error("Job timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Run cancelled")]
    Cancelled,

    // Run errors
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run already completed")]
    RunAlreadyCompleted,

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
