//! Wire types for the queue contract.

use serde::Deserialize;
use serde_json::Value;

use reelgen_models::{CampaignId, JobId, OutputSettings, RenderId, RenderJob, Scene};

use crate::error::{QueueError, QueueResult};

/// Row returned by the claim RPC.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimedRow {
    pub job_id: String,
    pub render_id: String,
    pub campaign_id: String,
    #[serde(default)]
    pub campaign_name: Option<String>,
    /// Ordered scene list as stored (jsonb)
    pub scenes: Value,
    #[serde(default)]
    pub facecam_url: Option<String>,
    #[serde(default)]
    pub lead_csv_url: Option<String>,
    #[serde(default)]
    pub lead_row_index: Option<u32>,
    /// Output settings as stored (jsonb); null means defaults
    #[serde(default)]
    pub output_settings: Option<Value>,
    #[serde(default)]
    pub cache_namespace: Option<String>,
    #[serde(default)]
    pub cache_key_salt: Option<String>,
}

impl ClaimedRow {
    /// Hydrate into the job the pipeline runs on.
    pub fn into_job(self) -> QueueResult<RenderJob> {
        let mut scenes: Vec<Scene> = serde_json::from_value(self.scenes)
            .map_err(|e| QueueError::fatal(format!("scenes column unreadable: {e}")))?;
        scenes.sort_by_key(|s| s.order);

        let output_settings = match self.output_settings {
            Some(Value::Null) | None => OutputSettings::default(),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| QueueError::fatal(format!("output_settings column unreadable: {e}")))?,
        };

        Ok(RenderJob {
            job_id: JobId::from_string(self.job_id),
            render_id: RenderId::from_string(self.render_id),
            campaign_id: CampaignId::from_string(self.campaign_id),
            campaign_name: self.campaign_name.unwrap_or_default(),
            scenes,
            facecam_url: self.facecam_url,
            lead_csv_url: self.lead_csv_url,
            lead_row_index: self.lead_row_index,
            output_settings,
            cache_namespace: self.cache_namespace,
            cache_key_salt: self.cache_key_salt,
        })
    }
}

/// Shape of `system_settings.value` for `max_concurrent_jobs`.
#[derive(Debug, Deserialize)]
pub struct ConcurrencySetting {
    pub limit: u32,
}
