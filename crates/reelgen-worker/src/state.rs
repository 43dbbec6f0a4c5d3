//! Cross-task worker state.
//!
//! The heartbeat timestamp and the current-job pointer are the only mutable
//! state shared between the job loop, the health server, and the shutdown
//! handler. Both sit behind short critical sections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use reelgen_models::RenderStatus;

/// Heartbeat older than this reads as unhealthy.
pub const HEARTBEAT_STALE_SECS: i64 = 60;

/// Snapshot of the in-flight job, surfaced by the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub render_id: String,
    pub campaign_id: String,
    pub status: RenderStatus,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
}

/// Shared worker state.
pub struct WorkerState {
    /// Worker instance identity, e.g. `worker-4f1c…`
    pub worker_name: String,
    started_instant: Instant,
    heartbeat: Mutex<DateTime<Utc>>,
    current_job: Mutex<Option<JobSummary>>,
    cancel_tx: Mutex<Option<watch::Sender<bool>>>,
    is_shutting_down: AtomicBool,
}

impl WorkerState {
    pub fn new() -> Self {
        Self {
            worker_name: format!("worker-{}", Uuid::new_v4()),
            started_instant: Instant::now(),
            heartbeat: Mutex::new(Utc::now()),
            current_job: Mutex::new(None),
            cancel_tx: Mutex::new(None),
            is_shutting_down: AtomicBool::new(false),
        }
    }

    /// Refresh the liveness timestamp. Called on every loop iteration and
    /// every progress callback; safe from sync contexts.
    pub fn tick_heartbeat(&self) {
        *self.heartbeat.lock().unwrap() = Utc::now();
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        *self.heartbeat.lock().unwrap()
    }

    pub fn heartbeat_age_secs(&self) -> i64 {
        (Utc::now() - self.last_heartbeat()).num_seconds()
    }

    pub fn is_healthy(&self) -> bool {
        self.heartbeat_age_secs() < HEARTBEAT_STALE_SECS
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_instant.elapsed().as_secs()
    }

    /// Register the in-flight job and its cancellation channel.
    pub fn begin_job(&self, summary: JobSummary, cancel_tx: watch::Sender<bool>) {
        *self.current_job.lock().unwrap() = Some(summary);
        *self.cancel_tx.lock().unwrap() = Some(cancel_tx);
    }

    /// Update the in-flight job snapshot.
    pub fn update_job(&self, status: RenderStatus, progress: u8) {
        if let Some(job) = self.current_job.lock().unwrap().as_mut() {
            job.status = status;
            job.progress = progress;
        }
    }

    pub fn end_job(&self) {
        *self.current_job.lock().unwrap() = None;
        *self.cancel_tx.lock().unwrap() = None;
    }

    pub fn current_job(&self) -> Option<JobSummary> {
        self.current_job.lock().unwrap().clone()
    }

    pub fn is_processing(&self) -> bool {
        self.current_job.lock().unwrap().is_some()
    }

    /// Fire the in-flight job's cancellation signal. Returns whether a job
    /// was there to cancel.
    pub fn trigger_cancel(&self) -> bool {
        match self.cancel_tx.lock().unwrap().as_ref() {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        }
    }

    pub fn set_shutting_down(&self) {
        self.is_shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> JobSummary {
        JobSummary {
            job_id: "j1".into(),
            render_id: "r1".into(),
            campaign_id: "c1".into(),
            status: RenderStatus::Recording,
            progress: 10,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_fresh_state_is_healthy() {
        let state = WorkerState::new();
        assert!(state.is_healthy());
        assert!(!state.is_processing());
        assert!(!state.is_shutting_down());
        assert!(state.worker_name.starts_with("worker-"));
    }

    #[test]
    fn test_job_lifecycle() {
        let state = WorkerState::new();
        let (tx, rx) = watch::channel(false);

        state.begin_job(summary(), tx);
        assert!(state.is_processing());

        state.update_job(RenderStatus::Concatenating, 60);
        let job = state.current_job().unwrap();
        assert_eq!(job.status, RenderStatus::Concatenating);
        assert_eq!(job.progress, 60);

        assert!(state.trigger_cancel());
        assert!(*rx.borrow());

        state.end_job();
        assert!(!state.is_processing());
        assert!(!state.trigger_cancel());
    }
}
