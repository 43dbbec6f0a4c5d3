//! Output settings and facecam layout.

use serde::{Deserialize, Serialize};

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_fps() -> u32 {
    60
}

fn default_pip_width() -> u32 {
    230
}

fn default_margin() -> u32 {
    24
}

/// Corner the facecam overlay is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

/// How the facecam is extended when it ends before the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndPadMode {
    /// Hold the last frame
    #[default]
    Freeze,
    /// Loop the facecam from the start
    Loop,
}

/// Facecam picture-in-picture layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacecamLayout {
    /// Width (and height, after center-crop to square) of the PiP in pixels
    #[serde(default = "default_pip_width")]
    pub pip_width: u32,

    /// Distance from the anchored corner in pixels
    #[serde(default = "default_margin")]
    pub margin: u32,

    /// Anchored corner
    #[serde(default)]
    pub corner: Corner,

    /// End-pad behavior
    #[serde(default)]
    pub end_pad: EndPadMode,
}

impl Default for FacecamLayout {
    fn default() -> Self {
        Self {
            pip_width: default_pip_width(),
            margin: default_margin(),
            corner: Corner::default(),
            end_pad: EndPadMode::default(),
        }
    }
}

/// Output video settings carried on the claimed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default)]
    pub facecam: FacecamLayout,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            facecam: FacecamLayout::default(),
        }
    }
}

impl OutputSettings {
    /// Exact frame count for a duration at the configured rate.
    pub fn frames_for_secs(&self, secs: u32) -> u32 {
        secs * self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings: OutputSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.width, 1920);
        assert_eq!(settings.height, 1080);
        assert_eq!(settings.fps, 60);
        assert_eq!(settings.facecam.pip_width, 230);
        assert_eq!(settings.facecam.margin, 24);
        assert_eq!(settings.facecam.corner, Corner::BottomRight);
        assert_eq!(settings.facecam.end_pad, EndPadMode::Freeze);
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{"width": 1280, "height": 720, "fps": 30, "facecam": {"corner": "top_left"}}"#;
        let settings: OutputSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.width, 1280);
        assert_eq!(settings.fps, 30);
        assert_eq!(settings.facecam.corner, Corner::TopLeft);
        // Unspecified layout fields keep their defaults.
        assert_eq!(settings.facecam.pip_width, 230);
    }

    #[test]
    fn test_frames_for_secs() {
        let settings = OutputSettings {
            fps: 30,
            ..Default::default()
        };
        assert_eq!(settings.frames_for_secs(10), 300);
    }
}
