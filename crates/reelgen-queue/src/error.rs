//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Connectivity or server-side hiccup; the caller retries.
    #[error("Transient queue error: {0}")]
    Transient(String),

    /// Contract violation (schema drift, auth); retrying cannot help.
    #[error("Fatal queue error: {0}")]
    Fatal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Transient(_))
    }
}

impl From<reqwest::Error> for QueueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            // A body we cannot parse means the contract moved under us.
            QueueError::Fatal(format!("response decode failed: {e}"))
        } else {
            QueueError::Transient(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(QueueError::transient("connection reset").is_transient());
        assert!(!QueueError::fatal("unknown column").is_transient());
    }
}
