//! Rounded-square alpha mask generation for the facecam overlay.

use std::path::Path;

use image::{ImageBuffer, Rgba};

use crate::error::{MediaError, MediaResult};

/// Corner radius as a fraction of the mask size.
const CORNER_RADIUS_RATIO: f32 = 0.18;

/// Anti-aliasing band width in pixels.
const EDGE_SOFTNESS: f32 = 1.0;

/// Write a white rounded-square RGBA mask of `size`×`size` pixels.
///
/// The alpha channel carries the shape: opaque inside, transparent outside,
/// with a one-pixel smoothed edge. The overlay graph extracts this alpha for
/// both the cam cutout and the shadow silhouette.
pub fn write_rounded_mask(path: impl AsRef<Path>, size: u32) -> MediaResult<()> {
    if size == 0 {
        return Err(MediaError::mask_failed("mask size must be positive"));
    }

    let radius = (size as f32 * CORNER_RADIUS_RATIO).max(1.0);
    let img = ImageBuffer::from_fn(size, size, |x, y| {
        let alpha = rounded_square_alpha(x as f32 + 0.5, y as f32 + 0.5, size as f32, radius);
        Rgba([255, 255, 255, alpha])
    });

    img.save(path.as_ref())
        .map_err(|e| MediaError::mask_failed(e.to_string()))
}

/// Alpha at a sample point: signed distance to the rounded-square boundary,
/// smoothed over `EDGE_SOFTNESS` pixels.
fn rounded_square_alpha(x: f32, y: f32, size: f32, radius: f32) -> u8 {
    let half = size / 2.0;
    // Distance from center, folded into one quadrant.
    let dx = (x - half).abs() - (half - radius);
    let dy = (y - half).abs() - (half - radius);

    let outside = if dx > 0.0 && dy > 0.0 {
        (dx * dx + dy * dy).sqrt() - radius
    } else {
        dx.max(dy) - radius
    };

    let t = (0.5 - outside / EDGE_SOFTNESS).clamp(0.0, 1.0);
    (t * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_opaque_corners_transparent() {
        let size = 64.0;
        let radius = size * CORNER_RADIUS_RATIO;
        assert_eq!(rounded_square_alpha(32.0, 32.0, size, radius), 255);
        assert_eq!(rounded_square_alpha(0.5, 0.5, size, radius), 0);
        assert_eq!(rounded_square_alpha(63.5, 0.5, size, radius), 0);
    }

    #[test]
    fn test_edge_midpoint_opaque() {
        // Middle of the top edge is inside the shape.
        let size = 64.0;
        let radius = size * CORNER_RADIUS_RATIO;
        assert!(rounded_square_alpha(32.0, 1.0, size, radius) > 200);
    }

    #[test]
    fn test_write_mask_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        write_rounded_mask(&path, 230).unwrap();

        let img = image::open(&path).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (230, 230));
        assert_eq!(img.get_pixel(115, 115)[3], 255);
        assert_eq!(img.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_rounded_mask(dir.path().join("m.png"), 0).is_err());
    }
}
