//! Facecam overlay composition.
//!
//! One FFmpeg invocation with three inputs: the concatenated background, the
//! facecam, and the pre-baked rounded-square alpha mask. The filter graph is
//! built from the typed AST so the audio-present and audio-absent variants
//! share everything but the audio chains.

use std::path::Path;
use tokio::sync::watch;
use tracing::debug;

use reelgen_models::{Corner, EndPadMode, FacecamLayout};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::graph::{FilterChain, FilterGraph};
use crate::normalize::TRANSCODE_TIMEOUT_SECS;

/// Padding around the PiP reserved for the blurred shadow, per side.
const SHADOW_PAD: u32 = 16;

/// Blur radius for the shadow.
const SHADOW_BLUR: u32 = 16;

/// Downward shift of the shadow relative to the PiP.
const SHADOW_DROP: i64 = 6;

/// Parameters for one overlay invocation.
#[derive(Debug, Clone)]
pub struct OverlaySpec {
    pub width: u32,
    pub height: u32,
    pub layout: FacecamLayout,
    /// Seconds of background before the facecam starts
    pub start_offset_secs: f64,
    /// Probed facecam duration in seconds
    pub facecam_duration: f64,
    /// Probed background duration in seconds
    pub background_duration: f64,
    /// Whether the facecam carries an audio stream
    pub facecam_has_audio: bool,
}

impl OverlaySpec {
    /// Top-left pixel position of the PiP for the configured corner.
    fn pip_position(&self) -> (i64, i64) {
        let w = self.width as i64;
        let h = self.height as i64;
        let p = self.layout.pip_width as i64;
        let m = self.layout.margin as i64;
        match self.layout.corner {
            Corner::TopLeft => (m, m),
            Corner::TopRight => (w - p - m, m),
            Corner::BottomLeft => (m, h - p - m),
            Corner::BottomRight => (w - p - m, h - p - m),
        }
    }

    /// Seconds of freeze-frame needed after the facecam ends.
    fn tail_pad_secs(&self) -> f64 {
        (self.background_duration - self.start_offset_secs - self.facecam_duration).max(0.0)
    }
}

/// Build the overlay filter graph.
///
/// Pads: `[1:v]` facecam, `[2:v]` mask, `[0:v]` background. Output video on
/// `[outv]`; output audio (when present) on `[outa]`.
pub fn build_overlay_graph(spec: &OverlaySpec) -> FilterGraph {
    let p = spec.layout.pip_width;
    let s = p + 2 * SHADOW_PAD;
    let (x, y) = spec.pip_position();
    let (sx, sy) = (x - SHADOW_PAD as i64, y - SHADOW_PAD as i64 + SHADOW_DROP);

    // Facecam: reset timestamps, center-crop square, scale to PiP width.
    let mut facecam = FilterChain::new()
        .input("1:v")
        .filter_args("setpts", "PTS-STARTPTS")
        .filter_args("crop", "'min(iw,ih)':'min(iw,ih)'")
        .filter_args("scale", format!("{p}:{p}"))
        .filter_args("format", "rgba");
    if spec.start_offset_secs > 0.0 {
        facecam = facecam.filter_args(
            "tpad",
            format!(
                "start_duration={:.3}:start_mode=clone",
                spec.start_offset_secs
            ),
        );
    }
    if spec.layout.end_pad == EndPadMode::Freeze && spec.tail_pad_secs() > 0.01 {
        facecam = facecam.filter_args(
            "tpad",
            format!("stop_duration={:.3}:stop_mode=clone", spec.tail_pad_secs()),
        );
    }
    let facecam = facecam.output("fc");

    // Mask: scale, take its alpha plane, split for the cam and shadow paths.
    let mask = FilterChain::new()
        .input("2:v")
        .filter_args("scale", format!("{p}:{p}"))
        .filter_args("format", "rgba")
        .filter("alphaextract")
        .filter_args("split", "2")
        .output("cam_a")
        .output("sh_a");

    // Rounded cam: facecam RGB under the mask alpha.
    let cam = FilterChain::new()
        .input("fc")
        .input("cam_a")
        .filter("alphamerge")
        .output("cam");

    // Shadow alpha: pad onto a larger transparent canvas, blur.
    let shadow_alpha = FilterChain::new()
        .input("sh_a")
        .filter_args(
            "pad",
            format!("{s}:{s}:{pad}:{pad}:black", pad = SHADOW_PAD),
        )
        .filter_args("boxblur", SHADOW_BLUR.to_string())
        .output("sh_blur");

    // Opaque black canvas for the shadow body.
    let shadow_canvas = FilterChain::new()
        .filter_args("color", format!("c=black:s={s}x{s}"))
        .filter_args("format", "rgba")
        .output("sh_canvas");

    // Translucent soft shadow: black canvas under blurred alpha at 50%.
    let shadow = FilterChain::new()
        .input("sh_canvas")
        .input("sh_blur")
        .filter("alphamerge")
        .filter_args("colorchannelmixer", "aa=0.5")
        .output("shadow");

    // Layer shadow then cam onto the background; the final overlay ends with
    // the background (shortest=1).
    let with_shadow = FilterChain::new()
        .input("0:v")
        .input("shadow")
        .filter_args("overlay", format!("{sx}:{sy}"))
        .output("bg1");
    let layered = FilterChain::new()
        .input("bg1")
        .input("cam")
        .filter_args("overlay", format!("{x}:{y}:shortest=1"))
        .output("outv");

    let mut graph = FilterGraph::new()
        .chain(facecam)
        .chain(mask)
        .chain(cam)
        .chain(shadow_alpha)
        .chain(shadow_canvas)
        .chain(shadow)
        .chain(with_shadow)
        .chain(layered);

    if spec.facecam_has_audio {
        let normalized = FilterChain::new()
            .input("1:a")
            .filter_args("asetpts", "PTS-STARTPTS")
            .output("fa");
        graph = graph.chain(normalized);

        let padded_input = if spec.start_offset_secs > 0.0 {
            // Prepend exact-length silence, then concat.
            graph = graph.chain(
                FilterChain::new()
                    .filter_args("aevalsrc", format!("0:d={:.3}", spec.start_offset_secs))
                    .output("sil"),
            );
            graph = graph.chain(
                FilterChain::new()
                    .input("sil")
                    .input("fa")
                    .filter_args("concat", "n=2:v=0:a=1")
                    .output("fa_off"),
            );
            "fa_off"
        } else {
            "fa"
        };

        // Pad-to-whole-duration must be explicit; implicit auto-pad is
        // unreliable across tool versions.
        graph = graph.chain(
            FilterChain::new()
                .input(padded_input)
                .filter_args("apad", format!("whole_dur={:.3}", spec.background_duration))
                .output("outa"),
        );
    }

    graph
}

/// Composite the facecam (and its shadow) onto the background.
///
/// Output: H.264 high profile, yuv420p, CRF 18, veryfast, AAC 128 kbps
/// 48 kHz when audio is present, `+faststart`.
pub async fn overlay_facecam<F>(
    background: impl AsRef<Path>,
    facecam: impl AsRef<Path>,
    mask: impl AsRef<Path>,
    output: impl AsRef<Path>,
    spec: &OverlaySpec,
    cancel: watch::Receiver<bool>,
    on_progress: F,
) -> MediaResult<()>
where
    F: Fn(crate::progress::FfmpegProgress) + Send + 'static,
{
    let graph = build_overlay_graph(spec);

    debug!(
        corner = ?spec.layout.corner,
        pip = spec.layout.pip_width,
        has_audio = spec.facecam_has_audio,
        "Overlaying facecam"
    );

    let mut cmd = FfmpegCommand::new(background, output).input(facecam);
    if spec.layout.end_pad == EndPadMode::Loop {
        cmd = cmd.input_args(["-stream_loop", "-1"]);
    }
    cmd = cmd
        .input(mask)
        .filter_complex(graph.render())
        .output_args(["-map", "[outv]"]);

    if spec.facecam_has_audio {
        cmd = cmd
            .output_args(["-map", "[outa]"])
            .audio_codec("aac")
            .output_args(["-b:a", "128k", "-ar", "48000"]);
    }

    cmd = cmd
        .video_codec("libx264")
        .output_args(["-profile:v", "high", "-pix_fmt", "yuv420p"])
        .crf(18)
        .preset("veryfast")
        .output_args(["-movflags", "+faststart"])
        // Hard bound on the mux: looped or over-long inputs must never run
        // past the background.
        .output_arg("-t")
        .output_arg(format!("{:.3}", spec.background_duration));

    FfmpegRunner::new()
        .with_cancel(cancel)
        .with_timeout(TRANSCODE_TIMEOUT_SECS)
        .run_with_progress(&cmd, on_progress)
        .await
}
