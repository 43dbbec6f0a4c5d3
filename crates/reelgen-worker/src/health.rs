//! Process-local health endpoint.
//!
//! Binds the preferred port or the next free one, and publishes the bound
//! port through the `HEALTH_PORT_ACTIVE` environment variable so the
//! monitor can find it.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::state::{JobSummary, WorkerState};

/// How many successive ports are tried after the preferred one.
const PORT_FALLBACK_RANGE: u16 = 10;

/// Health response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    last_heartbeat: DateTime<Utc>,
    current_job: Option<JobSummary>,
    concurrency: ConcurrencySnapshot,
    memory: MemorySnapshot,
    is_shutting_down: bool,
    worker: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConcurrencySnapshot {
    active: u32,
    limit: u32,
    available: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MemorySnapshot {
    rss_bytes: u64,
}

/// Shared handle the health server reads from.
#[derive(Clone)]
pub struct HealthContext {
    pub state: Arc<WorkerState>,
    /// Cached fleet cap, mirrored by the worker loop
    pub cap: Arc<std::sync::Mutex<u32>>,
}

/// Bind the health server, preferring `preferred_port` and falling back to
/// the next free port. Returns the bound port; the server runs until the
/// shutdown signal flips.
pub async fn serve(
    ctx: HealthContext,
    preferred_port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerResult<u16> {
    let (listener, port) = bind_with_fallback(preferred_port).await?;

    // Side channel for the monitor.
    std::env::set_var("HEALTH_PORT_ACTIVE", port.to_string());
    info!(port, "Health endpoint listening");

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(ctx);

    tokio::spawn(async move {
        let shutdown_signal = async move {
            loop {
                if shutdown.changed().await.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            warn!(error = %e, "Health server exited");
        }
    });

    Ok(port)
}

/// Try the preferred port, then the following ones.
async fn bind_with_fallback(preferred: u16) -> WorkerResult<(TcpListener, u16)> {
    for offset in 0..=PORT_FALLBACK_RANGE {
        let port = preferred + offset;
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                if offset > 0 {
                    warn!(preferred, port, "Preferred health port busy, using fallback");
                }
                return Ok((listener, port));
            }
            Err(_) => continue,
        }
    }
    Err(WorkerError::config(format!(
        "no free health port in {preferred}..={}",
        preferred + PORT_FALLBACK_RANGE
    )))
}

async fn health(State(ctx): State<HealthContext>) -> impl IntoResponse {
    let state = &ctx.state;
    let healthy = state.is_healthy();
    let limit = *ctx.cap.lock().unwrap();
    let active = if state.is_processing() { 1 } else { 0 };

    let body = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        uptime_secs: state.uptime_secs(),
        last_heartbeat: state.last_heartbeat(),
        current_job: state.current_job(),
        concurrency: ConcurrencySnapshot {
            active,
            limit,
            available: limit.saturating_sub(active),
        },
        memory: MemorySnapshot {
            rss_bytes: rss_bytes(),
        },
        is_shutting_down: state.is_shutting_down(),
        worker: state.worker_name.clone(),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn metrics(State(ctx): State<HealthContext>) -> String {
    render_metrics(&ctx.state)
}

/// Plain-text metrics, one value per line.
fn render_metrics(state: &WorkerState) -> String {
    format!(
        "worker_uptime_seconds {}\n\
         worker_seconds_since_heartbeat {}\n\
         worker_memory_rss_bytes {}\n\
         worker_is_processing {}\n",
        state.uptime_secs(),
        state.heartbeat_age_secs().max(0),
        rss_bytes(),
        if state.is_processing() { 1 } else { 0 },
    )
}

/// Resident set size from /proc; zero where unavailable.
fn rss_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    let kb: u64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0);
                    return kb * 1024;
                }
            }
        }
        0
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_fallback_when_port_taken() {
        // Grab an ephemeral port, then ask for it: the next one is used.
        let holder = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let taken = holder.local_addr().unwrap().port();

        let (_listener, port) = bind_with_fallback(taken).await.unwrap();
        assert_eq!(port, taken + 1);
    }

    #[test]
    fn test_metrics_rendering() {
        let state = WorkerState::new();
        let text = render_metrics(&state);
        assert!(text.contains("worker_uptime_seconds "));
        assert!(text.contains("worker_seconds_since_heartbeat 0"));
        assert!(text.contains("worker_is_processing 0"));
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_serve_publishes_active_port() {
        let ctx = HealthContext {
            state: Arc::new(WorkerState::new()),
            cap: Arc::new(std::sync::Mutex::new(3)),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Port 0 is not meaningful for fallback; pick a fixed high port.
        let port = serve(ctx, 38551, shutdown_rx).await.unwrap();
        assert!(port >= 38551);
        assert_eq!(
            std::env::var("HEALTH_PORT_ACTIVE").unwrap(),
            port.to_string()
        );
        let _ = shutdown_tx.send(true);
    }
}
