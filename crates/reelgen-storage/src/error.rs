//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Purge failed: {0}")]
    PurgeFailed(String),

    #[error("Upload timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    /// Upload and purge hiccups are retried once at the call site; config
    /// errors never are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::UploadFailed(_) | StorageError::PurgeFailed(_) | StorageError::Timeout(_)
        )
    }
}
