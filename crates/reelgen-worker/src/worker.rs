//! The worker loop: claim, process, report, repeat.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

use reelgen_media::{check_ffmpeg, check_ffprobe};
use reelgen_models::{RenderJob, RenderStatus};
use reelgen_queue::RenderQueue;
use reelgen_recorder::{SceneRecorder, SessionClient, SessionConfig};
use reelgen_storage::{StorageClient, UploadedArtifacts};

use crate::capture_cache::CaptureCache;
use crate::config::WorkerConfig;
use crate::context::{JobContext, ProgressSink};
use crate::disk::{DiskManager, RetentionPolicy};
use crate::download::{download_client, fetch_asset};
use crate::error::WorkerResult;
use crate::health::{self, HealthContext};
use crate::pipeline::{JobAssets, RecorderBackend, ScenePipeline};
use crate::retry::{retry_with_cancel, RetryConfig};
use crate::state::{JobSummary, WorkerState};

/// Attempts for terminal queue updates (complete/fail/cancel).
const TERMINAL_UPDATE_ATTEMPTS: u32 = 3;

/// After this many consecutive cap-refresh failures the warnings go quiet
/// until a read succeeds (the cap is polled every ~15 s, so a queue outage
/// would otherwise flood the log).
const CAP_REFRESH_MUTE_AFTER: u32 = 3;

/// Cached fleet cap plus freshness bookkeeping.
struct CapCache {
    limit: u32,
    fetched_at: Option<Instant>,
    failed_refreshes: u32,
}

impl CapCache {
    /// Note a good read; logs recovery if warnings had gone quiet.
    fn refresh_ok(&mut self, limit: u32) {
        if self.failed_refreshes > CAP_REFRESH_MUTE_AFTER {
            info!(
                failures = self.failed_refreshes,
                "Concurrency cap reads recovered"
            );
        }
        self.failed_refreshes = 0;
        if limit != self.limit {
            info!(limit, "Concurrency cap updated");
        }
        self.limit = limit;
    }

    /// Note a failed read, warning only until the mute threshold.
    fn refresh_failed(&mut self, error: &impl std::fmt::Display) {
        self.failed_refreshes += 1;
        if self.failed_refreshes <= CAP_REFRESH_MUTE_AFTER {
            warn!(
                %error,
                cached_limit = self.limit,
                "Concurrency cap read failed, keeping cached value"
            );
        } else if self.failed_refreshes == CAP_REFRESH_MUTE_AFTER + 1 {
            warn!(
                cached_limit = self.limit,
                "Concurrency cap still unreadable, muting until it recovers"
            );
        }
    }
}

/// One render worker process.
pub struct Worker {
    config: WorkerConfig,
    queue: Arc<RenderQueue>,
    storage: StorageClient,
    pipeline: ScenePipeline,
    disk: DiskManager,
    state: Arc<WorkerState>,
    http: reqwest::Client,
    shutdown_tx: watch::Sender<bool>,
    cap: tokio::sync::Mutex<CapCache>,
    /// Mirror of the cap for the health endpoint
    cap_mirror: Arc<std::sync::Mutex<u32>>,
}

impl Worker {
    /// Build a worker from the environment. Missing mandatory credentials or
    /// missing media binaries are fatal here, before the loop starts.
    pub fn new(config: WorkerConfig) -> WorkerResult<Self> {
        check_ffmpeg()?;
        check_ffprobe()?;

        let queue = Arc::new(RenderQueue::from_env()?);
        let storage = StorageClient::from_env()?;
        let sessions = SessionClient::new(SessionConfig::from_env()?)?;

        let state = Arc::new(WorkerState::new());
        let disk = DiskManager::new(&config.work_dir, RetentionPolicy::from(&config));
        let cache = CaptureCache::new(disk.cache_root());
        let recorder = SceneRecorder::new(sessions);
        let pipeline = ScenePipeline::new(
            Arc::new(RecorderBackend::new(recorder, Arc::clone(&state))),
            cache,
            config.page_wait_ms,
        );

        let (shutdown_tx, _) = watch::channel(false);
        let cap_mirror = Arc::new(std::sync::Mutex::new(config.max_concurrent_jobs));

        Ok(Self {
            cap: tokio::sync::Mutex::new(CapCache {
                limit: config.max_concurrent_jobs,
                fetched_at: None,
                failed_refreshes: 0,
            }),
            config,
            queue,
            storage,
            pipeline,
            disk,
            state,
            http: download_client()?,
            shutdown_tx,
            cap_mirror,
        })
    }

    /// Run until a shutdown signal drains the loop.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            worker = %self.state.worker_name,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting worker loop"
        );

        health::serve(
            HealthContext {
                state: Arc::clone(&self.state),
                cap: Arc::clone(&self.cap_mirror),
            },
            self.config.health_port,
            self.shutdown_tx.subscribe(),
        )
        .await?;

        self.disk.clone().spawn_reaper(self.shutdown_tx.subscribe());
        self.spawn_signal_handler();

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            self.state.tick_heartbeat();

            if self.state.is_shutting_down() {
                break;
            }

            let cap = self.current_cap().await;
            match self.queue.claim(cap).await {
                Ok(Some(job)) => {
                    self.process(job).await;
                }
                Ok(None) => {
                    self.idle_sleep(&mut shutdown_rx, self.config.poll_interval)
                        .await;
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Claim failed, backing off");
                    self.idle_sleep(&mut shutdown_rx, self.config.poll_interval)
                        .await;
                }
                Err(e) => {
                    // Schema drift or auth breakage; keep the process alive
                    // and observable, but back off hard.
                    error!(error = %e, "Claim failed fatally");
                    self.idle_sleep(&mut shutdown_rx, self.config.poll_interval * 5)
                        .await;
                }
            }
        }

        info!("Worker loop stopped");
        Ok(())
    }

    /// Signal shutdown programmatically (signals route here too).
    pub fn shutdown(&self) {
        self.state.set_shutting_down();
        let _ = self.shutdown_tx.send(true);
    }

    fn spawn_signal_handler(&self) {
        let state = Arc::clone(&self.state);
        let shutdown_tx = self.shutdown_tx.clone();
        let kill_timeout = self.config.kill_timeout;

        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Shutdown signal received, draining");
            state.set_shutting_down();
            let _ = shutdown_tx.send(true);

            // Give the in-flight job its grace period, then cut it loose.
            tokio::time::sleep(kill_timeout).await;
            if state.is_processing() {
                warn!(
                    kill_timeout_secs = kill_timeout.as_secs(),
                    "In-flight job outlived the drain window, cancelling"
                );
                state.trigger_cancel();
            }
        });
    }

    async fn idle_sleep(&self, shutdown_rx: &mut watch::Receiver<bool>, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    /// The cached fleet cap, refreshed when stale. Falls back to the
    /// configured default when the shared setting is absent, and keeps the
    /// last good value through read failures.
    async fn current_cap(&self) -> u32 {
        let mut cap = self.cap.lock().await;

        let stale = cap
            .fetched_at
            .map(|at| at.elapsed() >= self.config.cap_refresh)
            .unwrap_or(true);
        if stale {
            match self.queue.fetch_concurrency_cap().await {
                Ok(Some(limit)) => cap.refresh_ok(limit),
                Ok(None) => cap.refresh_ok(self.config.max_concurrent_jobs),
                Err(e) => cap.refresh_failed(&e),
            }
            cap.fetched_at = Some(Instant::now());
            *self.cap_mirror.lock().unwrap() = cap.limit;
        }

        cap.limit
    }

    /// Process one claimed job through to a terminal queue state. Never
    /// raises: every failure is mapped and the loop continues.
    async fn process(&self, job: RenderJob) {
        let span = tracing::info_span!(
            "job",
            job_id = %job.job_id,
            render_id = %job.render_id,
            campaign = %job.campaign_name
        );
        self.process_scoped(job).instrument(span).await;
    }

    async fn process_scoped(&self, job: RenderJob) {
        let workdir = match self
            .disk
            .create_workdir(job.campaign_id.as_str(), job.job_id.as_str())
            .await
        {
            Ok(dir) => dir,
            Err(e) => {
                error!(error = %e, "Could not create working directory");
                self.fail_job(&job, &format!("working directory: {e}")).await;
                return;
            }
        };

        let ctx = JobContext::new(
            job.render_id.clone(),
            Arc::clone(&self.queue) as Arc<dyn ProgressSink>,
            Arc::clone(&self.state),
        );
        self.state.begin_job(
            JobSummary {
                job_id: job.job_id.to_string(),
                render_id: job.render_id.to_string(),
                campaign_id: job.campaign_id.to_string(),
                status: RenderStatus::Recording,
                progress: 5,
                started_at: chrono::Utc::now(),
            },
            ctx.cancel_sender(),
        );

        let result = self.process_inner(&job, &workdir, &ctx).await;

        match result {
            Ok(artifacts) => {
                info!(final_url = %artifacts.final_url, "Job complete");
                if let Err(e) = self
                    .terminal_update(|| {
                        self.queue.complete(
                            &job.job_id,
                            &job.render_id,
                            &artifacts.final_url,
                            &artifacts.thumb_url,
                        )
                    })
                    .await
                {
                    error!(error = %e, "Completion update failed");
                }
                self.disk.retain_success(&workdir).await;
            }
            Err(e) if e.is_cancelled() => {
                let user_cancel = self
                    .queue
                    .is_cancelled(&job.render_id)
                    .await
                    .unwrap_or(false);
                if user_cancel || !self.state.is_shutting_down() {
                    info!("Job cancelled, cleaning up");
                    self.disk.delete_workdir(&workdir).await;
                    if let Err(e) = self
                        .terminal_update(|| {
                            self.queue.mark_cancelled(&job.job_id, &job.render_id)
                        })
                        .await
                    {
                        error!(error = %e, "Cancellation update failed");
                    }
                } else {
                    warn!("Job interrupted by worker shutdown");
                    self.fail_job(&job, "worker shutdown").await;
                    self.disk.retain_failure(&workdir).await;
                }
            }
            Err(e) => {
                error!(error = %e, "Job failed");
                self.fail_job(&job, &e.user_message()).await;
                self.disk.retain_failure(&workdir).await;
            }
        }

        self.state.end_job();
    }

    /// Fetch inputs, run the pipeline, upload artifacts.
    async fn process_inner(
        &self,
        job: &RenderJob,
        workdir: &std::path::Path,
        ctx: &JobContext,
    ) -> WorkerResult<UploadedArtifacts> {
        let mut assets = JobAssets::default();
        if let Some(url) = &job.facecam_url {
            let dest = workdir.join("facecam.mp4");
            retry_with_cancel(&RetryConfig::new("fetch_facecam"), ctx, || {
                fetch_asset(&self.http, url, &dest)
            })
            .await?;
            assets.facecam = Some(dest);
        }
        if let Some(url) = &job.lead_csv_url {
            let dest = workdir.join("leads.csv");
            retry_with_cancel(&RetryConfig::new("fetch_lead_csv"), ctx, || {
                fetch_asset(&self.http, url, &dest)
            })
            .await?;
            assets.lead_csv = Some(dest);
        }

        let output = self.pipeline.run(job, &assets, workdir, ctx).await?;

        ctx.report(RenderStatus::Uploading, 85).await?;

        // Uploads are idempotent per public id; one retry on transient.
        let public_id = job.public_id();
        let artifacts = match self
            .storage
            .upload(&output.final_path, &output.thumb_path, &public_id)
            .await
        {
            Ok(artifacts) => artifacts,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Upload failed, retrying once");
                ctx.checkpoint().await?;
                self.storage
                    .upload(&output.final_path, &output.thumb_path, &public_id)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        ctx.report(RenderStatus::Uploading, 95).await?;

        if let Err(e) = self
            .storage
            .purge(&[artifacts.final_url.clone(), artifacts.thumb_url.clone()])
            .await
        {
            warn!(error = %e, "CDN purge failed");
        }

        Ok(artifacts)
    }

    async fn fail_job(&self, job: &RenderJob, message: &str) {
        if let Err(e) = self
            .terminal_update(|| self.queue.fail(&job.job_id, &job.render_id, message))
            .await
        {
            error!(error = %e, "Failure update failed");
        }
    }

    /// Terminal queue updates retry through transient failures and ignore
    /// cancellation — a terminal state must land if the queue is reachable.
    async fn terminal_update<F, Fut>(&self, op: F) -> WorkerResult<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = reelgen_queue::QueueResult<()>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < TERMINAL_UPDATE_ATTEMPTS - 1 => {
                    attempt += 1;
                    let delay = Duration::from_secs(1u64 << (attempt - 1).min(4));
                    warn!(error = %e, attempt, "Terminal update failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
