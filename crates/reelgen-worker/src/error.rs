//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Precondition unmet; terminal, never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Network/queue/browser hiccup; retried per the stage policy.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Terminal for the job after retries are exhausted.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Distinguished terminal path, not a failure.
    #[error("Job cancelled")]
    Cancelled,

    /// Missing mandatory configuration; fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue error: {0}")]
    Queue(#[from] reelgen_queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] reelgen_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] reelgen_media::MediaError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] reelgen_recorder::RecorderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if the operation should be retried.
    ///
    /// Recorder failures count as transient: flaky page loads and session
    /// churn are exactly what the record retry policy exists for.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Transient(_) => true,
            WorkerError::Queue(e) => e.is_transient(),
            WorkerError::Storage(e) => e.is_transient(),
            WorkerError::Media(e) => e.is_transient(),
            WorkerError::Recorder(e) => !e.is_cancelled(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            WorkerError::Cancelled => true,
            WorkerError::Media(e) => e.is_cancelled(),
            WorkerError::Recorder(e) => e.is_cancelled(),
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, WorkerError::Validation(_))
    }

    /// Root-cause message stored on the failed render row.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(WorkerError::transient("socket reset").is_transient());
        assert!(!WorkerError::validation("Duration mismatch").is_transient());
        assert!(!WorkerError::permanent("gave up").is_transient());
        assert!(!WorkerError::Cancelled.is_transient());
        assert!(WorkerError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_recorder_errors_are_retryable() {
        let err = WorkerError::from(reelgen_recorder::RecorderError::Navigation(
            "net::ERR_TIMED_OUT".into(),
        ));
        assert!(err.is_transient());

        let cancelled = WorkerError::from(reelgen_recorder::RecorderError::Cancelled);
        assert!(!cancelled.is_transient());
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn test_queue_fatal_not_retryable() {
        let err = WorkerError::from(reelgen_queue::QueueError::fatal("schema drift"));
        assert!(!err.is_transient());
    }
}
