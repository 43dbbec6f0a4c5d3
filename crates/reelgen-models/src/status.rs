//! Render status lifecycle.

use serde::{Deserialize, Serialize};

/// Externally observable render status.
///
/// Pipeline stages advance strictly in declaration order; `Failed` and
/// `Cancelled` are terminal side exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    #[default]
    Queued,
    Recording,
    Normalizing,
    Concatenating,
    Overlaying,
    CreatingThumbnail,
    Uploading,
    Done,
    Failed,
    Cancelled,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::Queued => "queued",
            RenderStatus::Recording => "recording",
            RenderStatus::Normalizing => "normalizing",
            RenderStatus::Concatenating => "concatenating",
            RenderStatus::Overlaying => "overlaying",
            RenderStatus::CreatingThumbnail => "creating_thumbnail",
            RenderStatus::Uploading => "uploading",
            RenderStatus::Done => "done",
            RenderStatus::Failed => "failed",
            RenderStatus::Cancelled => "cancelled",
        }
    }

    /// Position in the forward pipeline, or `None` for terminal side exits.
    pub fn stage_index(&self) -> Option<u8> {
        match self {
            RenderStatus::Queued => Some(0),
            RenderStatus::Recording => Some(1),
            RenderStatus::Normalizing => Some(2),
            RenderStatus::Concatenating => Some(3),
            RenderStatus::Overlaying => Some(4),
            RenderStatus::CreatingThumbnail => Some(5),
            RenderStatus::Uploading => Some(6),
            RenderStatus::Done => Some(7),
            RenderStatus::Failed | RenderStatus::Cancelled => None,
        }
    }

    /// Check if no more updates are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RenderStatus::Done | RenderStatus::Failed | RenderStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RenderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&RenderStatus::CreatingThumbnail).unwrap(),
            "\"creating_thumbnail\""
        );
        let status: RenderStatus = serde_json::from_str("\"overlaying\"").unwrap();
        assert_eq!(status, RenderStatus::Overlaying);
    }

    #[test]
    fn test_stage_order() {
        let stages = [
            RenderStatus::Queued,
            RenderStatus::Recording,
            RenderStatus::Normalizing,
            RenderStatus::Concatenating,
            RenderStatus::Overlaying,
            RenderStatus::CreatingThumbnail,
            RenderStatus::Uploading,
            RenderStatus::Done,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].stage_index().unwrap() < pair[1].stage_index().unwrap());
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(RenderStatus::Done.is_terminal());
        assert!(RenderStatus::Failed.is_terminal());
        assert!(RenderStatus::Cancelled.is_terminal());
        assert!(!RenderStatus::Uploading.is_terminal());
        assert!(RenderStatus::Failed.stage_index().is_none());
    }
}
