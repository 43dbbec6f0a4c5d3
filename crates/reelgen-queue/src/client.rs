//! REST/RPC client over the render queue.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use reelgen_models::{JobId, RenderId, RenderJob, RenderStatus};

use crate::error::{QueueError, QueueResult};
use crate::types::{ClaimedRow, ConcurrencySetting};

/// Claim and status calls are bounded to ten seconds.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error messages stored on failed renders are truncated to this length.
const ERROR_MESSAGE_MAX: usize = 500;

/// Configuration for the queue client.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Base URL of the queue REST surface
    pub api_url: String,
    /// Service key sent as bearer token and api key
    pub service_key: String,
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Ok(Self {
            api_url: std::env::var("QUEUE_API_URL")
                .map_err(|_| QueueError::fatal("QUEUE_API_URL not set"))?,
            service_key: std::env::var("QUEUE_SERVICE_KEY")
                .map_err(|_| QueueError::fatal("QUEUE_SERVICE_KEY not set"))?,
        })
    }
}

/// Queue adapter.
///
/// The claim RPC owns the row-level locking; two concurrent claimers can
/// never receive the same queued row, and a claim above the fleet cap
/// returns an empty set.
#[derive(Clone)]
pub struct RenderQueue {
    http: reqwest::Client,
    config: QueueConfig,
}

impl RenderQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| QueueError::fatal(format!("http client build failed: {e}")))?;
        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.config.service_key)
            .header("apikey", &self.config.service_key)
    }

    /// Check a response status, classifying failures.
    async fn check(response: reqwest::Response, context: &str) -> QueueResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 408 || status.as_u16() == 429 {
            Err(QueueError::transient(format!("{context}: {status} {body}")))
        } else {
            Err(QueueError::fatal(format!("{context}: {status} {body}")))
        }
    }

    /// Atomically claim the oldest queued job if fewer than `cap` jobs are
    /// processing fleet-wide. Returns `None` when the cap is reached or the
    /// queue is empty.
    pub async fn claim(&self, cap: u32) -> QueueResult<Option<RenderJob>> {
        let response = self
            .authed(self.http.post(self.url("rpc/claim_render_job_with_limit")))
            .json(&json!({ "cap": cap }))
            .send()
            .await?;
        let response = Self::check(response, "claim").await?;

        let rows: Vec<ClaimedRow> = response.json().await?;
        match rows.into_iter().next() {
            Some(row) => {
                let job = row.into_job()?;
                info!(job_id = %job.job_id, render_id = %job.render_id, "Claimed render job");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Update render status and progress. Idempotent; callers guarantee the
    /// progress value is non-decreasing within a job.
    pub async fn report_progress(
        &self,
        render_id: &RenderId,
        status: RenderStatus,
        progress: u8,
        error_message: Option<&str>,
    ) -> QueueResult<()> {
        debug!(%render_id, %status, progress, "Reporting progress");

        let mut body = json!({
            "status": status.as_str(),
            "progress": progress.min(100),
            "updated_at": Utc::now().to_rfc3339(),
        });
        if let Some(message) = error_message {
            body["error_message"] = Value::String(truncate(message));
        }

        let response = self
            .authed(
                self.http
                    .patch(self.url(&format!("renders?id=eq.{}", render_id))),
            )
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;
        Self::check(response, "report_progress").await?;
        Ok(())
    }

    /// Terminal success: render done at 100 with artifact URLs, then the job
    /// row completed.
    pub async fn complete(
        &self,
        job_id: &JobId,
        render_id: &RenderId,
        final_url: &str,
        thumb_url: &str,
    ) -> QueueResult<()> {
        info!(%job_id, %render_id, "Completing render job");

        let response = self
            .authed(
                self.http
                    .patch(self.url(&format!("renders?id=eq.{}", render_id))),
            )
            .header("Prefer", "return=minimal")
            .json(&json!({
                "status": RenderStatus::Done.as_str(),
                "progress": 100,
                "final_video_url": final_url,
                "thumb_url": thumb_url,
                "updated_at": Utc::now().to_rfc3339(),
            }))
            .send()
            .await?;
        Self::check(response, "complete render").await?;

        self.update_job_state(job_id, "completed", None).await
    }

    /// Terminal failure on both rows.
    pub async fn fail(
        &self,
        job_id: &JobId,
        render_id: &RenderId,
        error_message: &str,
    ) -> QueueResult<()> {
        warn!(%job_id, %render_id, error = %error_message, "Failing render job");

        let response = self
            .authed(
                self.http
                    .patch(self.url(&format!("renders?id=eq.{}", render_id))),
            )
            .header("Prefer", "return=minimal")
            .json(&json!({
                "status": RenderStatus::Failed.as_str(),
                "error_message": truncate(error_message),
                "updated_at": Utc::now().to_rfc3339(),
            }))
            .send()
            .await?;
        Self::check(response, "fail render").await?;

        self.update_job_state(job_id, "failed", Some(error_message))
            .await
    }

    /// Terminal cancellation on both rows.
    pub async fn mark_cancelled(&self, job_id: &JobId, render_id: &RenderId) -> QueueResult<()> {
        info!(%job_id, %render_id, "Marking render job cancelled");

        let response = self
            .authed(
                self.http
                    .patch(self.url(&format!("renders?id=eq.{}", render_id))),
            )
            .header("Prefer", "return=minimal")
            .json(&json!({
                "status": RenderStatus::Cancelled.as_str(),
                "updated_at": Utc::now().to_rfc3339(),
            }))
            .send()
            .await?;
        Self::check(response, "cancel render").await?;

        self.update_job_state(job_id, "cancelled", None).await
    }

    async fn update_job_state(
        &self,
        job_id: &JobId,
        state: &str,
        error_message: Option<&str>,
    ) -> QueueResult<()> {
        let mut body = json!({
            "state": state,
            "updated_at": Utc::now().to_rfc3339(),
        });
        if let Some(message) = error_message {
            body["error_message"] = Value::String(truncate(message));
        }

        let response = self
            .authed(
                self.http
                    .patch(self.url(&format!("render_jobs?id=eq.{}", job_id))),
            )
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;
        Self::check(response, "update job state").await?;
        Ok(())
    }

    /// Read the cancellation flag on the render row.
    pub async fn is_cancelled(&self, render_id: &RenderId) -> QueueResult<bool> {
        #[derive(serde::Deserialize)]
        struct Row {
            cancelled_at: Option<String>,
        }

        let response = self
            .authed(self.http.get(self.url(&format!(
                "renders?id=eq.{}&select=cancelled_at",
                render_id
            ))))
            .send()
            .await?;
        let response = Self::check(response, "is_cancelled").await?;

        let rows: Vec<Row> = response.json().await?;
        Ok(rows
            .first()
            .map(|r| r.cancelled_at.is_some())
            .unwrap_or(false))
    }

    /// Read the fleet-wide concurrency cap; `None` when unset.
    pub async fn fetch_concurrency_cap(&self) -> QueueResult<Option<u32>> {
        #[derive(serde::Deserialize)]
        struct Row {
            value: ConcurrencySetting,
        }

        let response = self
            .authed(self.http.get(self.url(
                "system_settings?key=eq.max_concurrent_jobs&select=value",
            )))
            .send()
            .await?;
        let response = Self::check(response, "fetch_concurrency_cap").await?;

        let rows: Vec<Row> = response.json().await?;
        Ok(rows.first().map(|r| r.value.limit))
    }
}

fn truncate(message: &str) -> String {
    if message.len() <= ERROR_MESSAGE_MAX {
        message.to_string()
    } else {
        let mut end = ERROR_MESSAGE_MAX;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn queue(server: &MockServer) -> RenderQueue {
        RenderQueue::new(QueueConfig {
            api_url: server.uri(),
            service_key: "svc-key".into(),
        })
        .unwrap()
    }

    fn claimed_row() -> serde_json::Value {
        serde_json::json!([{
            "job_id": "j1",
            "render_id": "r1",
            "campaign_id": "c1",
            "campaign_name": "Launch",
            "scenes": [
                {"id": "s1", "url": "https://example.com", "duration_secs": 10, "order": 0, "entry_type": "manual"}
            ],
            "facecam_url": null,
            "lead_csv_url": null,
            "lead_row_index": null,
            "output_settings": {"width": 1280, "height": 720, "fps": 30}
        }])
    }

    #[tokio::test]
    async fn test_claim_returns_hydrated_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/claim_render_job_with_limit"))
            .and(header("apikey", "svc-key"))
            .and(body_partial_json(serde_json::json!({"cap": 3})))
            .respond_with(ResponseTemplate::new(200).set_body_json(claimed_row()))
            .expect(1)
            .mount(&server)
            .await;

        let job = queue(&server).claim(3).await.unwrap().unwrap();
        assert_eq!(job.job_id.as_str(), "j1");
        assert_eq!(job.output_settings.fps, 30);
        assert_eq!(job.scenes.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_empty_when_cap_reached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/claim_render_job_with_limit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        assert!(queue(&server).claim(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/claim_render_job_with_limit"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = queue(&server).claim(1).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_claim_schema_drift_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/claim_render_job_with_limit"))
            .respond_with(ResponseTemplate::new(404).set_body_string("unknown function"))
            .mount(&server)
            .await;

        let err = queue(&server).claim(1).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_report_progress_patches_render_row() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/renders"))
            .and(query_param("id", "eq.r1"))
            .and(body_partial_json(serde_json::json!({
                "status": "recording",
                "progress": 10
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        queue(&server)
            .report_progress(
                &RenderId::from_string("r1"),
                RenderStatus::Recording,
                10,
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_complete_updates_render_then_job() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/renders"))
            .and(query_param("id", "eq.r1"))
            .and(body_partial_json(serde_json::json!({
                "status": "done",
                "progress": 100,
                "final_video_url": "https://cdn/renders/videos/r1.mp4",
                "thumb_url": "https://cdn/renders/thumbs/r1.jpg"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/render_jobs"))
            .and(query_param("id", "eq.j1"))
            .and(body_partial_json(serde_json::json!({"state": "completed"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        queue(&server)
            .complete(
                &JobId::from_string("j1"),
                &RenderId::from_string("r1"),
                "https://cdn/renders/videos/r1.mp4",
                "https://cdn/renders/thumbs/r1.jpg",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        // Two identical completes make the same PATCHes; the row state after
        // the second is indistinguishable from the first.
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/renders"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/render_jobs"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;

        let queue = queue(&server);
        for _ in 0..2 {
            queue
                .complete(
                    &JobId::from_string("j1"),
                    &RenderId::from_string("r1"),
                    "https://cdn/v.mp4",
                    "https://cdn/t.jpg",
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_is_cancelled_reads_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/renders"))
            .and(query_param("id", "eq.r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"cancelled_at": "2026-08-01T10:00:00Z"}
            ])))
            .mount(&server)
            .await;

        assert!(queue(&server)
            .is_cancelled(&RenderId::from_string("r1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_is_cancelled_null_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/renders"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{"cancelled_at": null}])),
            )
            .mount(&server)
            .await;

        assert!(!queue(&server)
            .is_cancelled(&RenderId::from_string("r1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_fetch_concurrency_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/system_settings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"value": {"limit": 5}}
            ])))
            .mount(&server)
            .await;

        assert_eq!(queue(&server).fetch_concurrency_cap().await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_fetch_concurrency_cap_missing_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/system_settings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        assert_eq!(queue(&server).fetch_concurrency_cap().await.unwrap(), None);
    }

    #[test]
    fn test_truncate_long_message() {
        let long = "x".repeat(600);
        assert_eq!(truncate(&long).len(), 500);
        assert_eq!(truncate("short"), "short");
    }
}
