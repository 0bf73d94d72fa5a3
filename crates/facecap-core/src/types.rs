use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a required capture pose (e.g. `"left_45"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoseId(String);

impl PoseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id can name a file inside a session directory: non-empty,
    /// no path separators, no `..`.
    pub fn is_file_safe(&self) -> bool {
        !self.0.is_empty()
            && !self.0.contains(['/', '\\'])
            && !self.0.contains("..")
    }
}

impl fmt::Display for PoseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PoseId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Axis-aligned box in normalized frame coordinates, each edge in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl NormalizedBox {
    /// The whole frame.
    pub const FULL: NormalizedBox = NormalizedBox {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 1.0,
        max_y: 1.0,
    };

    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Pixel span `(x0, y0, x1, y1)` (half-open) covered by this box in a
    /// `width × height` raster, or `None` if the clamped box has no pixels.
    pub fn pixel_span(&self, width: u32, height: u32) -> Option<(usize, usize, usize, usize)> {
        let to_px = |v: f32, extent: u32, round_up: bool| -> usize {
            let scaled = v.clamp(0.0, 1.0) * extent as f32;
            let px = if round_up { scaled.ceil() } else { scaled.floor() };
            // NaN casts to 0.
            (px as usize).min(extent as usize)
        };

        let x0 = to_px(self.min_x, width, false);
        let x1 = to_px(self.max_x, width, true);
        let y0 = to_px(self.min_y, height, false);
        let y1 = to_px(self.max_y, height, true);

        if x1 <= x0 || y1 <= y0 {
            None
        } else {
            Some((x0, y0, x1, y1))
        }
    }
}

/// Device orientation, derived from the frame aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    pub fn of(width: u32, height: u32) -> Self {
        if height > width {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_box_spans_frame() {
        assert_eq!(NormalizedBox::FULL.pixel_span(100, 50), Some((0, 0, 100, 50)));
    }

    #[test]
    fn test_box_outside_frame_is_empty() {
        let b = NormalizedBox::new(1.2, 1.2, 1.8, 1.9);
        assert_eq!(b.pixel_span(100, 100), None);
    }

    #[test]
    fn test_inverted_box_is_empty() {
        let b = NormalizedBox::new(0.8, 0.1, 0.2, 0.9);
        assert_eq!(b.pixel_span(100, 100), None);
    }

    #[test]
    fn test_partial_box_rounds_outward() {
        let b = NormalizedBox::new(0.25, 0.5, 0.751, 1.4);
        assert_eq!(b.pixel_span(10, 10), Some((2, 5, 8, 10)));
    }

    #[test]
    fn test_nan_box_is_empty() {
        let b = NormalizedBox::new(f32::NAN, 0.0, f32::NAN, 1.0);
        assert_eq!(b.pixel_span(10, 10), None);
    }

    #[test]
    fn test_orientation() {
        assert_eq!(Orientation::of(1920, 1080), Orientation::Landscape);
        assert_eq!(Orientation::of(1080, 1920), Orientation::Portrait);
        assert_eq!(Orientation::of(10, 10), Orientation::Landscape);
    }
}
