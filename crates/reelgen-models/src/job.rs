//! Render job definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::output::OutputSettings;
use crate::scene::Scene;

/// Unique identifier for a queue job row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a render row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderId(pub String);

impl RenderId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub String);

impl CampaignId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A render job claimed from the queue, fully hydrated.
///
/// One job is exclusively owned by one worker between claim and terminal
/// update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    /// Queue job row ID
    pub job_id: JobId,

    /// Render row ID (externally observable status lives here)
    pub render_id: RenderId,

    /// Owning campaign
    pub campaign_id: CampaignId,

    /// Campaign display name (used for log context only)
    #[serde(default)]
    pub campaign_name: String,

    /// Ordered scenes to capture
    pub scenes: Vec<Scene>,

    /// Facecam asset URL, if the campaign has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facecam_url: Option<String>,

    /// Lead CSV asset URL (present for csv-entry scenes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_csv_url: Option<String>,

    /// Row index into the lead CSV
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_row_index: Option<u32>,

    /// Output settings (dimensions, fps, facecam layout)
    #[serde(default)]
    pub output_settings: OutputSettings,

    /// Optional namespace mixed into capture fingerprints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_namespace: Option<String>,

    /// Optional salt mixed into capture fingerprints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key_salt: Option<String>,
}

impl RenderJob {
    /// Sum of scene durations in seconds.
    pub fn total_duration_secs(&self) -> u32 {
        self.scenes.iter().map(|s| s.duration_secs).sum()
    }

    /// Public identifier used for uploaded artifact paths.
    pub fn public_id(&self) -> String {
        self.render_id.as_str().to_string()
    }
}
