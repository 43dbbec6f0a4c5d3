//! Scene definitions.

use serde::{Deserialize, Serialize};

/// How a scene URL is sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SceneEntry {
    /// URL is taken verbatim from the scene
    #[default]
    Manual,
    /// URL is substituted from the lead CSV row
    Csv,
}

impl SceneEntry {
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneEntry::Manual => "manual",
            SceneEntry::Csv => "csv",
        }
    }
}

/// One contiguous capture of a single URL for a prescribed duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    /// Scene identifier
    pub id: String,

    /// Page URL to capture (scheme may be absent; prepended at record time)
    pub url: String,

    /// Capture duration in whole seconds (positive, job total <= 300)
    pub duration_secs: u32,

    /// 0-based position in the final video
    pub order: u32,

    /// Entry type
    #[serde(default)]
    pub entry_type: SceneEntry,

    /// CSV column holding the URL when `entry_type` is `csv`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_column: Option<String>,
}

impl Scene {
    /// True when the URL must be substituted from the lead CSV.
    pub fn needs_csv_substitution(&self) -> bool {
        self.entry_type == SceneEntry::Csv
    }
}
