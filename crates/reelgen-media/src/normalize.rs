//! Per-scene normalization of raw captures.

use std::path::Path;
use tokio::sync::watch;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Transcode and overlay calls are bounded to ten minutes.
pub const TRANSCODE_TIMEOUT_SECS: u64 = 600;

/// Target parameters for a normalized scene segment.
#[derive(Debug, Clone)]
pub struct NormalizeSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Offset into the raw capture where content starts
    pub trim_start_ms: u64,
    /// Scene duration in whole seconds
    pub duration_secs: u32,
}

impl NormalizeSpec {
    /// Exact frame count the output must contain.
    pub fn frame_count(&self) -> u32 {
        self.duration_secs * self.fps
    }
}

/// Re-encode a raw capture into a normalized segment: exact dimensions and
/// frame rate, yuv420p, CRF 18, audio dropped.
///
/// The trim seek is placed after the input so it decodes to the requested
/// position (frame accurate) instead of snapping to a keyframe.
/// `on_progress` fires for every FFmpeg progress report; callers use it to
/// keep their liveness signal fresh through long encodes.
pub async fn normalize_capture<F>(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    spec: &NormalizeSpec,
    cancel: watch::Receiver<bool>,
    on_progress: F,
) -> MediaResult<()>
where
    F: Fn(crate::progress::FfmpegProgress) + Send + 'static,
{
    let filter = format!(
        "scale={}:{},fps={},format=yuv420p",
        spec.width, spec.height, spec.fps
    );

    debug!(
        trim_start_ms = spec.trim_start_ms,
        frames = spec.frame_count(),
        "Normalizing capture"
    );

    let cmd = FfmpegCommand::new(input, output)
        .output_seek(spec.trim_start_ms as f64 / 1000.0)
        .video_filter(filter)
        .video_frames(spec.frame_count())
        .no_audio()
        .video_codec("libx264")
        .crf(18)
        .preset("veryfast");

    FfmpegRunner::new()
        .with_cancel(cancel)
        .with_timeout(TRANSCODE_TIMEOUT_SECS)
        .run_with_progress(&cmd, on_progress)
        .await
}
