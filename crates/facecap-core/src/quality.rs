//! Frame quality scoring — mean brightness and Laplacian-variance sharpness.
//!
//! Both scores are pure functions of the pixel buffer. Thresholds live in
//! [`QualityThresholds`] so the calibration surface can move them at runtime.

use crate::types::NormalizedBox;
use facecap_frame::Frame;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BRIGHTNESS_THRESHOLD: u8 = 130;
pub const DEFAULT_BLUR_THRESHOLD: u64 = 500;
/// Frames are scored at this size unless configured otherwise.
pub const DEFAULT_ANALYSIS_SIZE: (u32, u32) = (100, 100);

/// Mean brightness plus the full-frame grayscale raster it was computed from.
#[derive(Debug, Clone)]
pub struct Brightness {
    /// Mean intensity 0–255 over the region of interest.
    pub brightness: u8,
    /// Row-major `floor((r + g + b) / 3)` for every pixel of the frame.
    pub gray: Vec<u8>,
}

/// Compute mean brightness, optionally restricted to a normalized box.
///
/// The grayscale raster always covers the whole frame (blur scoring needs
/// it). Falls back to the whole-frame mean when the box is absent or
/// contains no pixels.
pub fn compute_brightness(frame: &Frame, roi: Option<&NormalizedBox>) -> Brightness {
    let width = frame.width as usize;
    let span = roi.and_then(|b| b.pixel_span(frame.width, frame.height));

    let mut gray = Vec::with_capacity(frame.pixel_count());
    let mut total: u64 = 0;
    let mut roi_sum: u64 = 0;
    let mut roi_count: u64 = 0;

    for (i, [r, g, b]) in frame.rgb_pixels().enumerate() {
        let avg = ((r as u16 + g as u16 + b as u16) / 3) as u8;
        gray.push(avg);
        total += avg as u64;

        if let Some((x0, y0, x1, y1)) = span {
            let (x, y) = (i % width, i / width);
            if x >= x0 && x < x1 && y >= y0 && y < y1 {
                roi_sum += avg as u64;
                roi_count += 1;
            }
        }
    }

    let brightness = if roi_count > 0 {
        roi_sum / roi_count
    } else if !gray.is_empty() {
        total / gray.len() as u64
    } else {
        0
    };

    Brightness {
        brightness: brightness.min(255) as u8,
        gray,
    }
}

/// Variance of the 4-neighbour Laplacian over interior pixels, floored.
///
/// Kernel `[[0,1,0],[1,-4,1],[0,1,0]]`, 1-pixel border excluded. Higher is
/// sharper. Rasters without interior pixels (width or height < 3) score 0.
pub fn compute_blur_score(gray: &[u8], width: u32, height: u32) -> u64 {
    let w = width as usize;
    let h = height as usize;
    if w < 3 || h < 3 {
        return 0;
    }
    if gray.len() < w * h {
        tracing::warn!(
            len = gray.len(),
            width,
            height,
            "grayscale raster shorter than its dimensions; blur score forced to 0"
        );
        return 0;
    }

    let mut sum: i64 = 0;
    let mut sum_sq: i64 = 0;
    let mut count: i64 = 0;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let val = gray[i - w] as i64 + gray[i + w] as i64 + gray[i - 1] as i64
                + gray[i + 1] as i64
                - 4 * gray[i] as i64;
            sum += val;
            sum_sq += val * val;
            count += 1;
        }
    }

    let n = count as f64;
    let mean = sum as f64 / n;
    let variance = (sum_sq as f64 / n) - mean * mean;
    variance.max(0.0).floor() as u64
}

/// Low-light and sharpness cutoffs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Brightness strictly below this is low light.
    pub brightness: u8,
    /// Blur score strictly below this is blurry.
    pub blur: u64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            brightness: DEFAULT_BRIGHTNESS_THRESHOLD,
            blur: DEFAULT_BLUR_THRESHOLD,
        }
    }
}

/// One quality sample. Superseded by the next poll; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityReading {
    pub brightness: u8,
    pub blur_score: u64,
    pub is_low_light: bool,
    pub is_blurry: bool,
}

impl QualityReading {
    /// True when neither low light nor blur was flagged.
    pub fn is_acceptable(&self) -> bool {
        !self.is_low_light && !self.is_blurry
    }
}

/// Score a frame at native resolution against `thresholds`.
pub fn assess(
    frame: &Frame,
    roi: Option<&NormalizedBox>,
    thresholds: &QualityThresholds,
) -> QualityReading {
    let Brightness { brightness, gray } = compute_brightness(frame, roi);
    let blur_score = compute_blur_score(&gray, frame.width, frame.height);
    QualityReading {
        brightness,
        blur_score,
        is_low_light: brightness < thresholds.brightness,
        is_blurry: blur_score < thresholds.blur,
    }
}

/// Quality scorer with adjustable thresholds and optional downsampling.
#[derive(Debug, Clone)]
pub struct QualityAnalyzer {
    pub thresholds: QualityThresholds,
    /// Size frames are resampled to before scoring; `None` scores natively.
    pub analysis_size: Option<(u32, u32)>,
}

impl Default for QualityAnalyzer {
    fn default() -> Self {
        Self {
            thresholds: QualityThresholds::default(),
            analysis_size: Some(DEFAULT_ANALYSIS_SIZE),
        }
    }
}

impl QualityAnalyzer {
    pub fn new(thresholds: QualityThresholds, analysis_size: Option<(u32, u32)>) -> Self {
        Self {
            thresholds,
            analysis_size,
        }
    }

    pub fn analyze(&self, frame: &Frame, roi: Option<&NormalizedBox>) -> QualityReading {
        let reading = match self.analysis_size {
            Some((w, h)) if (w, h) != (frame.width, frame.height) => {
                assess(&frame.resized(w, h), roi, &self.thresholds)
            }
            _ => assess(frame, roi, &self.thresholds),
        };
        tracing::trace!(
            brightness = reading.brightness,
            blur = reading.blur_score,
            low_light = reading.is_low_light,
            blurry = reading.is_blurry,
            "quality sample"
        );
        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facecap_frame::PixelFormat;

    fn gray_frame(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Frame {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Frame::new(data, width, height, PixelFormat::Gray8).unwrap()
    }

    #[test]
    fn test_brightness_floors_channel_average() {
        // (10 + 20 + 31) / 3 = 20.33 → 20
        let frame = Frame::new(vec![10, 20, 31, 255], 1, 1, PixelFormat::Rgba8).unwrap();
        let b = compute_brightness(&frame, None);
        assert_eq!(b.brightness, 20);
        assert_eq!(b.gray, vec![20]);
    }

    #[test]
    fn test_brightness_full_box_equals_frame_mean() {
        let frame = gray_frame(17, 9, |x, y| ((x * 13 + y * 7) % 256) as u8);
        let whole = compute_brightness(&frame, None);
        let boxed = compute_brightness(&frame, Some(&NormalizedBox::FULL));
        assert_eq!(whole.brightness, boxed.brightness);
        assert_eq!(whole.gray, boxed.gray);
    }

    #[test]
    fn test_brightness_restricted_to_box() {
        // Left half 0, right half 200.
        let frame = gray_frame(10, 10, |x, _| if x < 5 { 0 } else { 200 });
        let right = NormalizedBox::new(0.5, 0.0, 1.0, 1.0);
        assert_eq!(compute_brightness(&frame, Some(&right)).brightness, 200);
        assert_eq!(compute_brightness(&frame, None).brightness, 100);
        // Gray raster still covers the full frame.
        assert_eq!(compute_brightness(&frame, Some(&right)).gray.len(), 100);
    }

    #[test]
    fn test_brightness_box_outside_falls_back_to_frame() {
        let frame = gray_frame(10, 10, |x, _| if x < 5 { 0 } else { 200 });
        let outside = NormalizedBox::new(1.5, 1.5, 2.0, 2.0);
        assert_eq!(compute_brightness(&frame, Some(&outside)).brightness, 100);
    }

    #[test]
    fn test_brightness_single_pixel() {
        let frame = gray_frame(1, 1, |_, _| 77);
        let tiny = NormalizedBox::new(0.2, 0.2, 0.3, 0.3);
        assert_eq!(compute_brightness(&frame, Some(&tiny)).brightness, 77);
    }

    #[test]
    fn test_blur_uniform_is_zero() {
        for v in [0u8, 1, 128, 255] {
            let frame = gray_frame(12, 8, |_, _| v);
            let gray = compute_brightness(&frame, None).gray;
            assert_eq!(compute_blur_score(&gray, 12, 8), 0, "value {v}");
        }
    }

    #[test]
    fn test_blur_degenerate_sizes() {
        assert_eq!(compute_blur_score(&[9], 1, 1), 0);
        assert_eq!(compute_blur_score(&[1, 2, 3, 4], 2, 2), 0);
        assert_eq!(compute_blur_score(&[0; 30], 10, 3), 0);
        // Short raster is rejected instead of indexing out of bounds.
        assert_eq!(compute_blur_score(&[0; 5], 3, 3), 0);
    }

    #[test]
    fn test_blur_single_spike() {
        // 3x3 with centre 10: one interior sample, variance of one value = 0.
        let gray = vec![0, 0, 0, 0, 10, 0, 0, 0, 0];
        assert_eq!(compute_blur_score(&gray, 3, 3), 0);

        // 4x3: interior samples at (1,1)=-40 and (2,1)=10 → mean -15, var 625.
        let gray = vec![0, 0, 0, 0, 0, 10, 0, 0, 0, 0, 0, 0];
        assert_eq!(compute_blur_score(&gray, 4, 3), 625);
    }

    #[test]
    fn test_checkerboard_sharper_than_gradient() {
        let checker = gray_frame(20, 20, |x, y| if (x + y) % 2 == 0 { 0 } else { 255 });
        let gradient = gray_frame(20, 20, |x, _| (x * 12) as u8);
        let c = compute_blur_score(&compute_brightness(&checker, None).gray, 20, 20);
        let g = compute_blur_score(&compute_brightness(&gradient, None).gray, 20, 20);
        assert!(c > g, "checker {c} should beat gradient {g}");
        assert_eq!(g, 0, "linear ramp has zero Laplacian");
    }

    #[test]
    fn test_assess_low_light() {
        let frame = gray_frame(10, 10, |_, _| 40);
        let reading = assess(&frame, None, &QualityThresholds::default());
        assert_eq!(reading.brightness, 40);
        assert!(reading.is_low_light);
        assert!(reading.is_blurry);
        assert!(!reading.is_acceptable());
    }

    #[test]
    fn test_assess_thresholds_are_strict() {
        let frame = gray_frame(4, 4, |_, _| 130);
        let thresholds = QualityThresholds { brightness: 130, blur: 0 };
        let reading = assess(&frame, None, &thresholds);
        assert!(!reading.is_low_light);
        assert!(!reading.is_blurry);
        assert!(reading.is_acceptable());
    }

    #[test]
    fn test_analyzer_downsamples() {
        let frame = gray_frame(400, 300, |_, _| 180);
        let analyzer = QualityAnalyzer::default();
        let reading = analyzer.analyze(&frame, None);
        assert_eq!(reading.brightness, 180);
        assert_eq!(reading.blur_score, 0);
    }
}
