//! Per-job context: progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

use reelgen_models::{RenderId, RenderStatus};
use reelgen_queue::{QueueResult, RenderQueue};

use crate::error::{WorkerError, WorkerResult};
use crate::state::WorkerState;

/// Attempts per progress update before it is dropped as advisory.
const REPORT_ATTEMPTS: u32 = 3;

/// Seam over the queue for progress and cancellation reads, so the pipeline
/// is testable without a live queue.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(
        &self,
        render_id: &RenderId,
        status: RenderStatus,
        progress: u8,
    ) -> QueueResult<()>;

    async fn is_cancelled(&self, render_id: &RenderId) -> QueueResult<bool>;
}

#[async_trait]
impl ProgressSink for RenderQueue {
    async fn report(
        &self,
        render_id: &RenderId,
        status: RenderStatus,
        progress: u8,
    ) -> QueueResult<()> {
        self.report_progress(render_id, status, progress, None).await
    }

    async fn is_cancelled(&self, render_id: &RenderId) -> QueueResult<bool> {
        RenderQueue::is_cancelled(self, render_id).await
    }
}

/// Carried through the pipeline; every `report` call doubles as a
/// cancellation checkpoint and a heartbeat tick.
pub struct JobContext {
    render_id: RenderId,
    sink: Arc<dyn ProgressSink>,
    state: Arc<WorkerState>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    watermark: AtomicU8,
}

impl JobContext {
    pub fn new(render_id: RenderId, sink: Arc<dyn ProgressSink>, state: Arc<WorkerState>) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            render_id,
            sink,
            state,
            cancel_tx,
            cancel_rx,
            watermark: AtomicU8::new(0),
        }
    }

    pub fn render_id(&self) -> &RenderId {
        &self.render_id
    }

    /// Sender half of the cancel signal, registered with the worker state so
    /// the shutdown handler can fire it.
    pub fn cancel_sender(&self) -> watch::Sender<bool> {
        self.cancel_tx.clone()
    }

    /// Receiver handed to sub-process runners; flipping it kills them.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    /// Non-blocking local check.
    pub fn cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Flip the local cancel flag (terminates in-flight sub-processes).
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn tick_heartbeat(&self) {
        self.state.tick_heartbeat();
    }

    pub fn state(&self) -> Arc<WorkerState> {
        Arc::clone(&self.state)
    }

    /// Cancellation checkpoint: consults the local flag, then the queue's
    /// flag. A queue read failure is treated as "not cancelled" — the next
    /// checkpoint retries.
    pub async fn checkpoint(&self) -> WorkerResult<()> {
        if self.cancelled() {
            return Err(WorkerError::Cancelled);
        }

        match self.sink.is_cancelled(&self.render_id).await {
            Ok(true) => {
                debug!(render_id = %self.render_id, "Cancellation observed");
                self.cancel();
                Err(WorkerError::Cancelled)
            }
            Ok(false) => Ok(()),
            Err(e) => {
                warn!(render_id = %self.render_id, error = %e, "Cancellation check failed");
                Ok(())
            }
        }
    }

    /// Report a stage transition. Progress is clamped to the monotonic
    /// watermark; the call is also the cancellation checkpoint and ticks the
    /// heartbeat. Update delivery failures after retries are logged and
    /// swallowed — progress is advisory, terminal updates are not.
    pub async fn report(&self, status: RenderStatus, progress: u8) -> WorkerResult<()> {
        self.checkpoint().await?;

        let previous = self.watermark.fetch_max(progress, Ordering::SeqCst);
        let progress = progress.max(previous);

        self.state.tick_heartbeat();
        self.state.update_job(status, progress);

        let mut last_err = None;
        for attempt in 1..=REPORT_ATTEMPTS {
            match self.sink.report(&self.render_id, status, progress).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < REPORT_ATTEMPTS => {
                    debug!(render_id = %self.render_id, attempt, error = %e, "Progress update retry");
                    tokio::time::sleep(std::time::Duration::from_millis(200 * attempt as u64))
                        .await;
                    last_err = Some(e);
                }
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = last_err {
            warn!(render_id = %self.render_id, error = %e, "Dropping progress update");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    /// Sink that records reports and serves a settable cancel flag.
    #[derive(Default)]
    pub struct RecordingSink {
        pub reports: Mutex<Vec<(RenderStatus, u8)>>,
        pub cancelled: AtomicBool,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn report(
            &self,
            _render_id: &RenderId,
            status: RenderStatus,
            progress: u8,
        ) -> QueueResult<()> {
            self.reports.lock().unwrap().push((status, progress));
            Ok(())
        }

        async fn is_cancelled(&self, _render_id: &RenderId) -> QueueResult<bool> {
            Ok(self.cancelled.load(Ordering::SeqCst))
        }
    }

    /// Build a context wired to a recording sink.
    pub fn test_context() -> (JobContext, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let ctx = JobContext::new(
            RenderId::from_string("r-test"),
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
            Arc::new(WorkerState::new()),
        );
        (ctx, sink)
    }

    #[tokio::test]
    async fn test_progress_watermark_is_monotonic() {
        let (ctx, sink) = test_context();

        ctx.report(RenderStatus::Recording, 10).await.unwrap();
        ctx.report(RenderStatus::Recording, 30).await.unwrap();
        // A stale lower value must not move progress backwards.
        ctx.report(RenderStatus::Normalizing, 20).await.unwrap();

        let reports = sink.reports.lock().unwrap();
        let values: Vec<u8> = reports.iter().map(|(_, p)| *p).collect();
        assert_eq!(values, vec![10, 30, 30]);
        for pair in values.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[tokio::test]
    async fn test_checkpoint_observes_queue_cancel() {
        let (ctx, sink) = test_context();
        assert!(ctx.checkpoint().await.is_ok());

        sink.cancelled.store(true, Ordering::SeqCst);
        let err = ctx.checkpoint().await.unwrap_err();
        assert!(err.is_cancelled());
        // Local flag is now latched; sub-process signals fired.
        assert!(ctx.cancelled());
    }

    #[tokio::test]
    async fn test_report_is_a_checkpoint() {
        let (ctx, sink) = test_context();
        sink.cancelled.store(true, Ordering::SeqCst);

        let err = ctx.report(RenderStatus::Recording, 10).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(sink.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_cancel_short_circuits() {
        let (ctx, _sink) = test_context();
        ctx.cancel();
        assert!(ctx.checkpoint().await.unwrap_err().is_cancelled());
    }
}
