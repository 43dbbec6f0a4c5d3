//! The scene pipeline: capture, normalize, concat, overlay, thumbnail.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use reelgen_media::fs_utils::move_file;
use reelgen_media::{
    concat_segments, generate_thumbnail, normalize_capture, overlay_facecam, probe_video,
    write_rounded_mask, NormalizeSpec, OverlaySpec,
};
use reelgen_models::{RenderJob, RenderStatus, Scene};
use reelgen_recorder::{Capture, RecordRequest, SceneRecorder};

use crate::capture_cache::{fingerprint, CaptureCache};
use crate::context::JobContext;
use crate::error::{WorkerError, WorkerResult};
use crate::leads;
use crate::retry::{retry_with_cancel, RetryConfig};
use crate::state::WorkerState;

/// Hard ceiling on the summed scene durations.
const MAX_TOTAL_DURATION_SECS: u32 = 300;

/// Heartbeat cadence while a capture is holding.
const CAPTURE_KEEPALIVE: Duration = Duration::from_secs(15);

/// Seam over the scene recorder so the pipeline is testable without a
/// browser fleet.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn record(
        &self,
        request: &RecordRequest,
        output: &Path,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<Capture>;
}

/// Production backend: the real recorder plus a keepalive that ticks the
/// heartbeat while a capture holds (captures emit no progress callbacks).
pub struct RecorderBackend {
    recorder: SceneRecorder,
    state: Arc<WorkerState>,
}

impl RecorderBackend {
    pub fn new(recorder: SceneRecorder, state: Arc<WorkerState>) -> Self {
        Self { recorder, state }
    }
}

#[async_trait]
impl CaptureBackend for RecorderBackend {
    async fn record(
        &self,
        request: &RecordRequest,
        output: &Path,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<Capture> {
        let state = Arc::clone(&self.state);
        let keepalive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CAPTURE_KEEPALIVE);
            loop {
                ticker.tick().await;
                state.tick_heartbeat();
            }
        });

        let result = self.recorder.record(request, output, cancel).await;
        keepalive.abort();
        Ok(result?)
    }
}

/// Inputs fetched into the working directory before the pipeline runs.
#[derive(Debug, Default)]
pub struct JobAssets {
    pub facecam: Option<PathBuf>,
    pub lead_csv: Option<PathBuf>,
}

/// Final artifacts on local disk.
#[derive(Debug)]
pub struct PipelineOutput {
    pub final_path: PathBuf,
    pub thumb_path: PathBuf,
}

/// Turns one claimed job into a final artifact and thumbnail.
pub struct ScenePipeline {
    capture: Arc<dyn CaptureBackend>,
    cache: CaptureCache,
    page_wait_ms: u64,
}

impl ScenePipeline {
    pub fn new(capture: Arc<dyn CaptureBackend>, cache: CaptureCache, page_wait_ms: u64) -> Self {
        Self {
            capture,
            cache,
            page_wait_ms,
        }
    }

    /// Run the pipeline. Progress and status follow the stage contract:
    /// recording 10→40, normalizing 50, concatenating 60→70, overlaying
    /// 70→80, thumbnail 80→85. Cancellation is observed between scenes and
    /// between stages via the context.
    pub async fn run(
        &self,
        job: &RenderJob,
        assets: &JobAssets,
        workdir: &Path,
        ctx: &JobContext,
    ) -> WorkerResult<PipelineOutput> {
        let scenes = self.prepare_scenes(job, assets)?;

        let facecam_info = match &assets.facecam {
            Some(path) => Some(probe_video(path).await?),
            None => None,
        };
        if let Some(info) = &facecam_info {
            validate_facecam_duration(info.duration, total_duration(&scenes))?;
        }

        let settings = &job.output_settings;
        let heartbeat = {
            let state = ctx.state();
            move |_| state.tick_heartbeat()
        };

        // Capture and normalize each scene in order.
        let mut segments = Vec::with_capacity(scenes.len());
        for (index, scene) in scenes.iter().enumerate() {
            let progress = 10 + (30 * index / scenes.len()) as u8;
            ctx.report(RenderStatus::Recording, progress).await?;

            let (raw, trim_hint_ms) = self.capture_scene(job, scene, workdir, ctx).await?;

            let segment = workdir.join(format!("seg_{}.mp4", scene.order));
            let spec = NormalizeSpec {
                width: settings.width,
                height: settings.height,
                fps: settings.fps,
                trim_start_ms: trim_hint_ms,
                duration_secs: scene.duration_secs,
            };
            normalize_capture(&raw, &segment, &spec, ctx.cancel_signal(), heartbeat.clone())
                .await?;
            segments.push(segment);
        }

        ctx.report(RenderStatus::Normalizing, 50).await?;

        ctx.report(RenderStatus::Concatenating, 60).await?;
        let concat_path = workdir.join("concat.mp4");
        concat_segments(
            &segments,
            &concat_path,
            settings.fps,
            ctx.cancel_signal(),
            heartbeat.clone(),
        )
        .await?;
        ctx.report(RenderStatus::Concatenating, 70).await?;

        ctx.report(RenderStatus::Overlaying, 70).await?;
        let final_path = workdir.join("final.mp4");
        match (&assets.facecam, &facecam_info) {
            (Some(facecam), Some(info)) => {
                let mask = workdir.join("mask.png");
                write_rounded_mask(&mask, settings.facecam.pip_width)?;

                let background = probe_video(&concat_path).await?;
                let spec = OverlaySpec {
                    width: settings.width,
                    height: settings.height,
                    layout: settings.facecam.clone(),
                    start_offset_secs: 0.0,
                    facecam_duration: info.duration,
                    background_duration: background.duration,
                    facecam_has_audio: info.has_audio,
                };
                overlay_facecam(
                    &concat_path,
                    facecam,
                    &mask,
                    &final_path,
                    &spec,
                    ctx.cancel_signal(),
                    heartbeat.clone(),
                )
                .await?;
            }
            _ => {
                // No facecam: the concat output is the final artifact.
                move_file(&concat_path, &final_path).await?;
            }
        }
        ctx.report(RenderStatus::Overlaying, 80).await?;

        ctx.report(RenderStatus::CreatingThumbnail, 80).await?;
        let thumb_path = workdir.join("thumb.jpg");
        generate_thumbnail(&final_path, &thumb_path, settings.width, settings.height).await?;
        ctx.report(RenderStatus::CreatingThumbnail, 85).await?;

        info!(render_id = %ctx.render_id(), "Pipeline produced final artifact");
        Ok(PipelineOutput {
            final_path,
            thumb_path,
        })
    }

    /// Substitute CSV scenes and validate preconditions.
    fn prepare_scenes(&self, job: &RenderJob, assets: &JobAssets) -> WorkerResult<Vec<Scene>> {
        let mut scenes = job.scenes.clone();

        if scenes.iter().any(|s| s.needs_csv_substitution()) {
            let csv = assets.lead_csv.as_deref().ok_or_else(|| {
                WorkerError::validation("Job has csv scenes but no lead CSV asset")
            })?;
            let row_index = job.lead_row_index.ok_or_else(|| {
                WorkerError::validation("Job has csv scenes but no lead row index")
            })?;
            leads::substitute_csv_scenes(&mut scenes, csv, row_index)?;
        }

        validate_scenes(&scenes)?;
        Ok(scenes)
    }

    /// Get a raw capture: cache hit, or record with retry and populate the
    /// cache. Returns the capture path inside the working directory and its
    /// trim hint.
    async fn capture_scene(
        &self,
        job: &RenderJob,
        scene: &Scene,
        workdir: &Path,
        ctx: &JobContext,
    ) -> WorkerResult<(PathBuf, u64)> {
        let fp = fingerprint(
            job.cache_namespace.as_deref(),
            &scene.url,
            scene.entry_type.as_str(),
            job.cache_key_salt.as_deref(),
        );
        let raw = workdir.join(format!("raw_{}.mp4", scene.order));

        if let Some(hit) = self.cache.get(&fp, scene.duration_secs).await {
            info!(scene = %scene.id, %fp, "Using cached capture");
            tokio::fs::copy(&hit.path, &raw).await?;
            return Ok((raw, hit.trim_hint_ms));
        }

        let settings = &job.output_settings;
        let request = RecordRequest {
            url: scene.url.clone(),
            duration_secs: scene.duration_secs,
            order: scene.order,
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            page_wait_ms: self.page_wait_ms,
        };

        let retry = RetryConfig::new(format!("record_scene_{}", scene.order));
        let capture = retry_with_cancel(&retry, ctx, || {
            self.capture.record(&request, &raw, ctx.cancel_signal())
        })
        .await?;

        if let Err(e) = self.cache.put(&fp, &raw, capture.trim_hint_ms).await {
            warn!(scene = %scene.id, error = %e, "Failed to cache capture");
        }

        Ok((raw, capture.trim_hint_ms))
    }
}

fn total_duration(scenes: &[Scene]) -> u32 {
    scenes.iter().map(|s| s.duration_secs).sum()
}

/// Scene preconditions: at least one scene, every duration >= 1 s, total
/// <= 300 s.
pub fn validate_scenes(scenes: &[Scene]) -> WorkerResult<()> {
    if scenes.is_empty() {
        return Err(WorkerError::validation("Job has no scenes"));
    }
    for scene in scenes {
        if scene.duration_secs < 1 {
            return Err(WorkerError::validation(format!(
                "Scene {} duration must be at least 1 second",
                scene.id
            )));
        }
    }
    let total = total_duration(scenes);
    if total > MAX_TOTAL_DURATION_SECS {
        return Err(WorkerError::validation(format!(
            "Total scene duration {total}s exceeds the {MAX_TOTAL_DURATION_SECS}s limit"
        )));
    }
    Ok(())
}

/// Facecam precondition: its floored duration must equal the summed scene
/// durations.
pub fn validate_facecam_duration(facecam_secs: f64, scene_total: u32) -> WorkerResult<()> {
    let floored = facecam_secs.floor() as u32;
    if floored != scene_total {
        return Err(WorkerError::validation(format!(
            "Duration mismatch: facecam is {floored}s but scenes total {scene_total}s"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use reelgen_models::{CampaignId, JobId, RenderId, SceneEntry};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn scene(id: &str, duration: u32, order: u32) -> Scene {
        Scene {
            id: id.into(),
            url: format!("https://example.com/{id}"),
            duration_secs: duration,
            order,
            entry_type: SceneEntry::Manual,
            csv_column: None,
        }
    }

    fn job(scenes: Vec<Scene>) -> RenderJob {
        RenderJob {
            job_id: JobId::from_string("j1"),
            render_id: RenderId::from_string("r1"),
            campaign_id: CampaignId::from_string("c1"),
            campaign_name: "Test".into(),
            scenes,
            facecam_url: None,
            lead_csv_url: None,
            lead_row_index: None,
            output_settings: Default::default(),
            cache_namespace: None,
            cache_key_salt: None,
        }
    }

    #[test]
    fn test_validate_scenes_happy() {
        assert!(validate_scenes(&[scene("a", 1, 0)]).is_ok());
        // Exactly at the ceiling.
        assert!(validate_scenes(&[scene("a", 150, 0), scene("b", 150, 1)]).is_ok());
    }

    #[test]
    fn test_validate_scenes_empty() {
        let err = validate_scenes(&[]).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_validate_scenes_zero_duration() {
        let err = validate_scenes(&[scene("a", 0, 0)]).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_validate_scenes_over_ceiling() {
        // 301 seconds total must fail.
        let err = validate_scenes(&[scene("a", 150, 0), scene("b", 151, 1)]).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("301"));
    }

    #[test]
    fn test_validate_facecam_match_and_mismatch() {
        assert!(validate_facecam_duration(30.4, 30).is_ok());
        let err = validate_facecam_duration(25.0, 30).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("Duration mismatch"));
    }

    /// Backend that fails a configurable number of times before producing a
    /// capture file.
    struct FlakyBackend {
        calls: AtomicU32,
        failures_before_success: u32,
    }

    #[async_trait]
    impl CaptureBackend for FlakyBackend {
        async fn record(
            &self,
            _request: &RecordRequest,
            output: &Path,
            _cancel: watch::Receiver<bool>,
        ) -> WorkerResult<Capture> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(WorkerError::transient("scene record flake"));
            }
            tokio::fs::write(output, b"raw-capture").await?;
            Ok(Capture {
                path: output.to_path_buf(),
                trim_hint_ms: 500,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_recovers_after_two_failures() {
        let workdir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let backend = Arc::new(FlakyBackend {
            calls: AtomicU32::new(0),
            failures_before_success: 2,
        });
        let pipeline = ScenePipeline::new(
            Arc::clone(&backend) as Arc<dyn CaptureBackend>,
            CaptureCache::new(cache_dir.path()),
            0,
        );
        let (ctx, _sink) = test_context();

        let job = job(vec![scene("a", 10, 0)]);
        let (raw, trim) = pipeline
            .capture_scene(&job, &job.scenes[0], workdir.path(), &ctx)
            .await
            .unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(raw.exists());
        assert_eq!(trim, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_exhaustion_is_permanent() {
        let workdir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let backend = Arc::new(FlakyBackend {
            calls: AtomicU32::new(0),
            failures_before_success: u32::MAX,
        });
        let pipeline = ScenePipeline::new(
            backend as Arc<dyn CaptureBackend>,
            CaptureCache::new(cache_dir.path()),
            0,
        );
        let (ctx, _sink) = test_context();

        let job = job(vec![scene("a", 10, 0)]);
        let err = pipeline
            .capture_scene(&job, &job.scenes[0], workdir.path(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_cancel_between_scenes() {
        let workdir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let backend = Arc::new(FlakyBackend {
            calls: AtomicU32::new(0),
            failures_before_success: 0,
        });
        let pipeline = ScenePipeline::new(
            Arc::clone(&backend) as Arc<dyn CaptureBackend>,
            CaptureCache::new(cache_dir.path()),
            0,
        );
        let (ctx, sink) = test_context();
        sink.cancelled.store(true, Ordering::SeqCst);

        let job = job(vec![scene("a", 10, 0)]);
        let err = pipeline
            .capture_scene(&job, &job.scenes[0], workdir.path(), &ctx)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        // The checkpoint fired before any record attempt.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_prepare_scenes_requires_csv_asset() {
        let backend = Arc::new(FlakyBackend {
            calls: AtomicU32::new(0),
            failures_before_success: 0,
        });
        let cache_dir = TempDir::new().unwrap();
        let pipeline = ScenePipeline::new(
            backend as Arc<dyn CaptureBackend>,
            CaptureCache::new(cache_dir.path()),
            0,
        );

        let mut csv_scene = scene("a", 10, 0);
        csv_scene.entry_type = SceneEntry::Csv;
        csv_scene.csv_column = Some("website".into());
        let job = job(vec![csv_scene]);

        let err = pipeline
            .prepare_scenes(&job, &JobAssets::default())
            .unwrap_err();
        assert!(err.is_validation());
    }
}
