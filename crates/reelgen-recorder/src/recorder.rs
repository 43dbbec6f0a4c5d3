//! Scene recording through a remote browser session.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use crate::error::{RecorderError, RecorderResult};
use crate::session::SessionClient;
use crate::trim;

/// Extra capture held beyond the scene duration; trimmed downstream via the
/// content-start hint.
const LEAD_IN_SECS: u64 = 2;

/// Margin added to the scene duration for the per-record deadline.
const RECORD_TIMEOUT_MARGIN_SECS: u64 = 30;

/// Default cap on the wait for network idle after navigation.
const DEFAULT_PAGE_WAIT_MS: u64 = 5000;

/// Quiet window that counts as "network idle".
const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Fixed settle time for lazy-loaded embeds after the readiness protocol.
const WIDGET_SETTLE: Duration = Duration::from_millis(1500);

/// Deadline for the first screencast frame to arrive.
const FIRST_FRAME_DEADLINE: Duration = Duration::from_secs(5);

/// One scene capture request.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub url: String,
    pub duration_secs: u32,
    pub order: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Cap on the post-navigation network-idle wait; 0 uses the default
    pub page_wait_ms: u64,
}

impl RecordRequest {
    fn page_wait(&self) -> Duration {
        if self.page_wait_ms == 0 {
            Duration::from_millis(DEFAULT_PAGE_WAIT_MS)
        } else {
            Duration::from_millis(self.page_wait_ms)
        }
    }
}

/// A finished raw capture.
#[derive(Debug, Clone)]
pub struct Capture {
    pub path: PathBuf,
    /// Offset where meaningful content starts
    pub trim_hint_ms: u64,
}

/// Records scenes by driving a remote headless browser.
#[derive(Clone)]
pub struct SceneRecorder {
    sessions: SessionClient,
}

impl SceneRecorder {
    pub fn new(sessions: SessionClient) -> Self {
        Self { sessions }
    }

    /// Record one scene to `output`.
    ///
    /// The session is released unconditionally, whatever the capture result.
    pub async fn record(
        &self,
        request: &RecordRequest,
        output: &Path,
        cancel: watch::Receiver<bool>,
    ) -> RecorderResult<Capture> {
        let session = self.sessions.acquire(request.width, request.height).await?;

        let result = self
            .record_in_session(&session.ws_url, request, output, cancel)
            .await;

        self.sessions.release(&session).await;

        result?;

        let trim_hint_ms = trim::detect_content_start(output).await;
        info!(
            scene = request.order,
            trim_hint_ms, "Scene capture complete"
        );
        Ok(Capture {
            path: output.to_path_buf(),
            trim_hint_ms,
        })
    }

    async fn record_in_session(
        &self,
        ws_url: &str,
        request: &RecordRequest,
        output: &Path,
        cancel: watch::Receiver<bool>,
    ) -> RecorderResult<()> {
        let cdp = CdpClient::connect(ws_url).await?;

        cdp.call("Page.enable", json!({})).await?;
        cdp.call("Network.enable", json!({})).await?;

        let url = normalize_url(&request.url)?;
        debug!(scene = request.order, %url, "Navigating");

        let mut events = cdp.subscribe();
        let nav = cdp.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(text) = nav.get("errorText").and_then(|v| v.as_str()) {
            return Err(RecorderError::Navigation(text.to_string()));
        }

        // Network idle, capped; proceed on timeout.
        let idle = tokio::time::timeout(request.page_wait(), async {
            let mut inflight: i64 = 0;
            loop {
                let event =
                    match tokio::time::timeout(NETWORK_QUIET_WINDOW, events.recv()).await {
                        Ok(Ok(event)) => event,
                        // Quiet window elapsed with nothing in flight.
                        Err(_) if inflight <= 0 => break,
                        Err(_) => continue,
                        Ok(Err(_)) => break,
                    };
                match event.method.as_str() {
                    "Network.requestWillBeSent" => inflight += 1,
                    "Network.loadingFinished" | "Network.loadingFailed" => inflight -= 1,
                    _ => {}
                }
            }
        })
        .await;
        if idle.is_err() {
            debug!(scene = request.order, "Network idle wait capped, proceeding");
        }

        self.prepare_widgets(&cdp).await;

        self.capture(&cdp, request, output, cancel).await
    }

    /// Widget readiness protocol. Every step is best-effort: a failed step is
    /// logged and the recording proceeds.
    async fn prepare_widgets(&self, cdp: &CdpClient) {
        cdp.call_best_effort("Page.bringToFront", json!({})).await;
        cdp.call_best_effort("Emulation.setFocusEmulationEnabled", json!({ "enabled": true }))
            .await;
        cdp.call_best_effort("Page.setWebLifecycleState", json!({ "state": "active" }))
            .await;

        cdp.call_best_effort(
            "Runtime.evaluate",
            json!({ "expression": "document.fonts.ready", "awaitPromise": true }),
        )
        .await;

        // Synthetic resize/scroll plus a one-pixel nudge wakes lazy-load
        // observers that only attach after first interaction.
        cdp.call_best_effort(
            "Runtime.evaluate",
            json!({
                "expression": "window.dispatchEvent(new Event('resize')); \
                               window.dispatchEvent(new Event('scroll')); \
                               window.scrollBy(0, 1); window.scrollBy(0, -1);"
            }),
        )
        .await;

        cdp.call_best_effort(
            "Runtime.evaluate",
            json!({
                "expression": "new Promise(r => requestAnimationFrame(() => requestAnimationFrame(r)))",
                "awaitPromise": true
            }),
        )
        .await;

        tokio::time::sleep(WIDGET_SETTLE).await;
    }

    /// Run the screencast into an FFmpeg sink at a constant frame rate.
    async fn capture(
        &self,
        cdp: &CdpClient,
        request: &RecordRequest,
        output: &Path,
        mut cancel: watch::Receiver<bool>,
    ) -> RecorderResult<()> {
        which::which("ffmpeg").map_err(|_| RecorderError::capture_failed("ffmpeg not in PATH"))?;

        let scale = format!("scale={}:{}", request.width, request.height);
        let mut sink = Command::new("ffmpeg")
            .args(["-y", "-hide_banner", "-v", "error"])
            .args(["-f", "image2pipe", "-framerate"])
            .arg(request.fps.to_string())
            .args(["-i", "-", "-vf"])
            .arg(&scale)
            .args(["-c:v", "libx264", "-preset", "ultrafast"])
            .args(["-crf", "18", "-pix_fmt", "yuv420p"])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = sink
            .stdin
            .take()
            .ok_or_else(|| RecorderError::capture_failed("sink stdin not captured"))?;

        // Latest decoded frame; the ticker below resamples it to a constant
        // rate so variable screencast delivery cannot stretch the timeline.
        let latest: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let mut events = cdp.subscribe();

        cdp.call(
            "Page.startScreencast",
            json!({ "format": "jpeg", "quality": 85, "everyNthFrame": 1 }),
        )
        .await?;

        let frame_store = Arc::clone(&latest);
        let ack_client = cdp.clone();
        let frame_task = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if event.method != "Page.screencastFrame" {
                    continue;
                }
                let Some(data) = event.params.get("data").and_then(|v| v.as_str()) else {
                    continue;
                };
                if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data) {
                    *frame_store.lock().await = Some(bytes);
                }
                if let Some(session_id) = event.params.get("sessionId").cloned() {
                    ack_client
                        .notify(
                            "Page.screencastFrameAck",
                            json!({ "sessionId": session_id }),
                        )
                        .await;
                }
            }
        });

        let capture_result = self
            .hold_capture(request, &mut stdin, &latest, &mut cancel)
            .await;

        cdp.call_best_effort("Page.stopScreencast", json!({})).await;
        frame_task.abort();

        drop(stdin);

        if capture_result.is_err() {
            // Cancelled or timed out: do not wait on finalize.
            let _ = sink.kill().await;
            capture_result?;
        }

        let status = tokio::time::timeout(Duration::from_secs(30), sink.wait()).await;

        match status {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(RecorderError::capture_failed(format!(
                "capture sink exited with {:?}",
                status.code()
            ))),
            Ok(Err(e)) => Err(RecorderError::Io(e)),
            Err(_) => {
                let _ = sink.kill().await;
                Err(RecorderError::capture_failed("capture sink hung on finalize"))
            }
        }
    }

    /// Write frames at 1/fps ticks for `duration + lead-in`.
    async fn hold_capture(
        &self,
        request: &RecordRequest,
        stdin: &mut tokio::process::ChildStdin,
        latest: &Arc<Mutex<Option<Vec<u8>>>>,
        cancel: &mut watch::Receiver<bool>,
    ) -> RecorderResult<()> {
        let deadline =
            Duration::from_secs(request.duration_secs as u64 + RECORD_TIMEOUT_MARGIN_SECS);
        let hold = Duration::from_secs(request.duration_secs as u64 + LEAD_IN_SECS);
        let total_frames = (request.duration_secs as u64 + LEAD_IN_SECS) * request.fps as u64;

        let run = async {
            // First frame must arrive before the clock starts.
            let first_frame_wait = async {
                loop {
                    if latest.lock().await.is_some() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            };
            if tokio::time::timeout(FIRST_FRAME_DEADLINE, first_frame_wait)
                .await
                .is_err()
            {
                return Err(RecorderError::capture_failed("no screencast frames received"));
            }

            let mut ticker =
                tokio::time::interval(Duration::from_secs_f64(1.0 / request.fps as f64));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

            for _ in 0..total_frames {
                tokio::select! {
                    _ = ticker.tick() => {
                        let frame = latest.lock().await.clone();
                        if let Some(bytes) = frame {
                            stdin.write_all(&bytes).await?;
                        }
                    }
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            return Err(RecorderError::Cancelled);
                        }
                    }
                }
            }
            Ok(())
        };

        match tokio::time::timeout(deadline, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    scene = request.order,
                    hold_secs = hold.as_secs(),
                    "Recording deadline exceeded"
                );
                Err(RecorderError::Timeout(deadline.as_secs()))
            }
        }
    }
}

/// Prepend https:// when the scheme is missing, and validate.
pub fn normalize_url(raw: &str) -> RecorderResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RecorderError::InvalidUrl("empty URL".into()));
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    url::Url::parse(&with_scheme)
        .map_err(|e| RecorderError::InvalidUrl(format!("{}: {}", trimmed, e)))?;
    Ok(with_scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_prepends_scheme() {
        assert_eq!(
            normalize_url("example.com/page").unwrap(),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_normalize_url_keeps_scheme() {
        assert_eq!(
            normalize_url("http://example.com").unwrap(),
            "http://example.com"
        );
        assert_eq!(
            normalize_url("https://example.com").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn test_normalize_url_rejects_garbage() {
        assert!(normalize_url("").is_err());
        assert!(normalize_url("ht tp://bad url").is_err());
    }
}
