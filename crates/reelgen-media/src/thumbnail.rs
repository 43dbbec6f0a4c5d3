//! Thumbnail generation.

use std::path::Path;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Seek position for the thumbnail frame.
const THUMBNAIL_TIMESTAMP_SECS: f64 = 3.0;

/// Extract a single JPEG frame from the final artifact at t=3s, scaled to
/// the output dimensions.
pub async fn generate_thumbnail(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    width: u32,
    height: u32,
) -> MediaResult<()> {
    debug!("Generating thumbnail");

    let cmd = FfmpegCommand::new(video_path, output_path)
        .input_arg("-ss")
        .input_arg(format!("{:.3}", THUMBNAIL_TIMESTAMP_SECS))
        .video_filter(format!("scale={}:{}", width, height))
        .video_frames(1)
        .output_args(["-q:v", "2"]);

    FfmpegRunner::new().with_timeout(60).run(&cmd).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_args() {
        let cmd = FfmpegCommand::new("final.mp4", "thumb.jpg")
            .input_arg("-ss")
            .input_arg(format!("{:.3}", THUMBNAIL_TIMESTAMP_SECS))
            .video_filter("scale=1280:720")
            .video_frames(1);
        let args = cmd.build_args();
        assert!(args.contains(&"3.000".to_string()));
        assert!(args.contains(&"scale=1280:720".to_string()));
        assert!(args.contains(&"-frames:v".to_string()));
        // Thumbnail seek is an input seek; frame accuracy is irrelevant here.
        let i_pos = args.iter().position(|a| a == "-i").unwrap();
        let ss_pos = args.iter().position(|a| a == "-ss").unwrap();
        assert!(ss_pos < i_pos);
    }
}
