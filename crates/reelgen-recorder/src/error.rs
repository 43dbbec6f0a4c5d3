//! Recorder error types.

use thiserror::Error;

pub type RecorderResult<T> = Result<T, RecorderError>;

/// Errors raised while capturing a scene.
///
/// The recorder itself never retries; retry policy lives with the caller.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Browser session create failed: {0}")]
    SessionCreate(String),

    #[error("Browser session release failed: {0}")]
    SessionRelease(String),

    #[error("Debug protocol error: {0}")]
    Protocol(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Invalid scene URL: {0}")]
    InvalidUrl(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Recording cancelled")]
    Cancelled,

    #[error("Recording timed out after {0} seconds")]
    Timeout(u64),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn capture_failed(msg: impl Into<String>) -> Self {
        Self::CaptureFailed(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RecorderError::Cancelled)
    }
}
