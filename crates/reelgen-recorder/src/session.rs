//! Remote browser session lifecycle.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{RecorderError, RecorderResult};

/// Default bounded session lifetime.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 600;

/// Configuration for the session service.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the session service
    pub api_url: String,
    /// Access token
    pub api_token: String,
    /// Bounded session lifetime in seconds
    pub session_timeout_secs: u64,
}

impl SessionConfig {
    /// Create config from environment variables.
    pub fn from_env() -> RecorderResult<Self> {
        Ok(Self {
            api_url: std::env::var("BROWSER_API_URL")
                .map_err(|_| RecorderError::SessionCreate("BROWSER_API_URL not set".into()))?,
            api_token: std::env::var("BROWSER_API_TOKEN")
                .map_err(|_| RecorderError::SessionCreate("BROWSER_API_TOKEN not set".into()))?,
            session_timeout_secs: std::env::var("BROWSER_SESSION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS),
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest {
    width: u32,
    height: u32,
    device_scale: u32,
    headless: bool,
    viewer_disabled: bool,
    timeout_secs: u64,
}

/// A live remote browser session.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSession {
    /// Session identifier, used for release
    pub id: String,
    /// WebSocket URL for the debug protocol
    pub ws_url: String,
}

/// Client for the remote browser session service.
#[derive(Clone)]
pub struct SessionClient {
    http: reqwest::Client,
    config: SessionConfig,
}

impl SessionClient {
    pub fn new(config: SessionConfig) -> RecorderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config })
    }

    /// Acquire a session pinned to `width`×`height` at device-scale 1.
    pub async fn acquire(&self, width: u32, height: u32) -> RecorderResult<BrowserSession> {
        let body = CreateSessionRequest {
            width,
            height,
            device_scale: 1,
            headless: true,
            viewer_disabled: true,
            timeout_secs: self.config.session_timeout_secs,
        };

        let response = self
            .http
            .post(format!("{}/sessions", self.config.api_url.trim_end_matches('/')))
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| RecorderError::SessionCreate(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RecorderError::SessionCreate(format!(
                "session service returned {}",
                response.status()
            )));
        }

        let session: BrowserSession = response
            .json()
            .await
            .map_err(|e| RecorderError::SessionCreate(e.to_string()))?;

        info!(session_id = %session.id, "Acquired browser session");
        Ok(session)
    }

    /// Release a session. Failures are logged; the remote side also expires
    /// sessions at the bounded lifetime.
    pub async fn release(&self, session: &BrowserSession) {
        debug!(session_id = %session.id, "Releasing browser session");
        let result = self
            .http
            .delete(format!(
                "{}/sessions/{}",
                self.config.api_url.trim_end_matches('/'),
                session.id
            ))
            .bearer_auth(&self.config.api_token)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(session_id = %session.id, status = %response.status(), "Session release rejected");
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Session release failed");
            }
        }
    }
}
