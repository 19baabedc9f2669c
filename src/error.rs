use thiserror::Error;

#[derive(Error, Debug)]
pub enum LakesyncError {
    #[error("Failed to start job: {0}")]
    StartJobFailed(String),

    #[error("Task execution failed: {0}")]
    ExecuteTaskFailed(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Trigger cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LakesyncError>;
