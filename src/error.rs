use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage fault: {0}")]
    Storage(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("network unavailable: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("sync already in progress")]
    SyncInProgress,

    #[error("retry budget exhausted for {0} event(s)")]
    RetryBudgetExhausted(usize),

    #[error("merge conflict: {0}")]
    MergeConflict(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Process exit code for CLI surfaces. Usage errors exit 2 via clap.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Database(_) | SyncError::Storage(_) => 3,
            SyncError::Serialization(_)
            | SyncError::Validation(_)
            | SyncError::UnknownEventType(_)
            | SyncError::MergeConflict(_) => 4,
            SyncError::Network(_) | SyncError::Timeout(_) => 5,
            SyncError::SyncInProgress | SyncError::RetryBudgetExhausted(_) => 1,
        }
    }
}
