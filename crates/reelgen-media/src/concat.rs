//! Concatenation of normalized scene segments.

use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::normalize::TRANSCODE_TIMEOUT_SECS;

/// Concatenate ordered normalized segments into one contiguous stream.
///
/// Uses the concat demuxer (container framing is trusted — every input was
/// produced by normalize with identical parameters) and re-encodes video so
/// timestamps stay monotonic across the splice points. A single segment goes
/// through the same path.
pub async fn concat_segments<F>(
    segments: &[PathBuf],
    output: impl AsRef<Path>,
    fps: u32,
    cancel: watch::Receiver<bool>,
    on_progress: F,
) -> MediaResult<()>
where
    F: Fn(crate::progress::FfmpegProgress) + Send + 'static,
{
    if segments.is_empty() {
        return Err(MediaError::InvalidVideo(
            "No segments to concatenate".to_string(),
        ));
    }

    let output = output.as_ref();
    let list_path = output.with_extension("concat.txt");
    let mut list = String::new();
    for segment in segments {
        if !segment.exists() {
            return Err(MediaError::FileNotFound(segment.clone()));
        }
        // Concat-demuxer escaping: wrap in single quotes, escape embedded ones.
        let escaped = segment.to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{}'\n", escaped));
    }
    tokio::fs::write(&list_path, list).await?;

    debug!(segments = segments.len(), "Concatenating segments");

    let cmd = FfmpegCommand::new(&list_path, output)
        .input_args(["-f", "concat", "-safe", "0"])
        .output_arg("-r")
        .output_arg(fps.to_string())
        .video_codec("libx264")
        .crf(18)
        .preset("veryfast")
        .no_audio();

    let result = FfmpegRunner::new()
        .with_cancel(cancel)
        .with_timeout(TRANSCODE_TIMEOUT_SECS)
        .run_with_progress(&cmd, on_progress)
        .await;

    let _ = tokio::fs::remove_file(&list_path).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_segments_rejected() {
        let (_, rx) = watch::channel(false);
        let result = tokio_test::block_on(concat_segments(&[], "out.mp4", 30, rx, |_| {}));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_segment_rejected() {
        let (_, rx) = watch::channel(false);
        let segments = vec![PathBuf::from("/nonexistent/seg_0.mp4")];
        let result = tokio_test::block_on(concat_segments(&segments, "out.mp4", 30, rx, |_| {}));
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }

    #[test]
    fn test_list_escaping() {
        let escaped = "seg'0.mp4".replace('\'', "'\\''");
        assert_eq!(escaped, "seg'\\''0.mp4");
    }
}
