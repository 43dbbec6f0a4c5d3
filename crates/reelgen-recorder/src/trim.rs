//! Content-start detection on raw captures.
//!
//! The first significant scene change marks where the page stopped painting
//! chrome and started showing content; normalize seeks past everything
//! before it.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Perceptual scene-change threshold.
const SCENE_THRESHOLD: f64 = 0.3;

/// Analysis sample rate.
const SAMPLE_FPS: u32 = 10;

/// Fallback when no change is detected.
const FALLBACK_TRIM_MS: u64 = 500;

/// Find the first significant scene change, in milliseconds.
///
/// Analysis failures fall back to a fixed 500 ms trim rather than failing
/// the scene.
pub async fn detect_content_start(capture: &Path) -> u64 {
    match run_detection(capture).await {
        Ok(Some(ms)) => ms,
        Ok(None) => {
            debug!("No scene change detected, using fallback trim");
            FALLBACK_TRIM_MS
        }
        Err(e) => {
            warn!(error = %e, "Content-start detection failed, using fallback trim");
            FALLBACK_TRIM_MS
        }
    }
}

async fn run_detection(capture: &Path) -> std::io::Result<Option<u64>> {
    let filter = format!(
        "fps={},scale=160:-2,select='gt(scene,{})',showinfo",
        SAMPLE_FPS, SCENE_THRESHOLD
    );

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-v", "info", "-i"])
        .arg(capture)
        .arg("-vf")
        .arg(&filter)
        .args(["-frames:v", "1", "-f", "null", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(parse_first_pts_ms(&stderr))
}

/// Pull the first `pts_time:` out of showinfo output.
fn parse_first_pts_ms(stderr: &str) -> Option<u64> {
    for line in stderr.lines() {
        if !line.contains("Parsed_showinfo") {
            continue;
        }
        if let Some(rest) = line.split("pts_time:").nth(1) {
            let token: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if let Ok(secs) = token.parse::<f64>() {
                return Some((secs * 1000.0).round() as u64);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_showinfo_pts() {
        let stderr = "[Parsed_showinfo_3 @ 0x5617] n:   0 pts:  21504 pts_time:1.4  pos: 123 fmt:yuv420p";
        assert_eq!(parse_first_pts_ms(stderr), Some(1400));
    }

    #[test]
    fn test_parse_ignores_unrelated_lines() {
        let stderr = "frame=    1 fps=0.0 q=-0.0 size=N/A time=00:00:01.40 bitrate=N/A\n\
                      [Parsed_showinfo_3 @ 0x5617] config in time_base: 1/15360\n\
                      [Parsed_showinfo_3 @ 0x5617] n:   0 pts:  7680 pts_time:0.5  pos: 9\n";
        assert_eq!(parse_first_pts_ms(stderr), Some(500));
    }

    #[test]
    fn test_parse_no_match() {
        assert_eq!(parse_first_pts_ms("frame=0 fps=0.0"), None);
    }

    #[tokio::test]
    async fn test_missing_file_falls_back() {
        let ms = detect_content_start(Path::new("/nonexistent/capture.mp4")).await;
        assert_eq!(ms, FALLBACK_TRIM_MS);
    }
}
