//! Still extraction: turn the frame held at capture time into a lossless
//! PNG, optionally cropped to the face with some padding.

use crate::landmarks::{FaceLandmarks, LandmarkLayout};
use facecap_frame::Frame;
use image::{imageops, DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

/// Horizontal padding as a fraction of the face width, each side.
pub const PADDING_X: f32 = 0.10;
/// Vertical padding as a fraction of the face height, each side.
pub const PADDING_Y: f32 = 0.25;

#[derive(Error, Debug)]
pub enum CropError {
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Pixel rectangle inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Padded face rectangle for a `width × height` frame.
///
/// The face box is the outline landmark bounds; it is grown by
/// [`PADDING_X`]/[`PADDING_Y`] and clamped to the frame. `None` when the
/// landmarks are empty or the clamped region has no pixels.
pub fn face_region(
    face: &FaceLandmarks,
    layout: &LandmarkLayout,
    width: u32,
    height: u32,
) -> Option<CropRegion> {
    let bounds = face.bounds(layout.outline)?;
    let (w, h) = (width as f32, height as f32);

    let min_x = bounds.min_x * w;
    let max_x = bounds.max_x * w;
    let min_y = bounds.min_y * h;
    let max_y = bounds.max_y * h;
    let pad_x = (max_x - min_x) * PADDING_X;
    let pad_y = (max_y - min_y) * PADDING_Y;

    let x0 = (min_x - pad_x).max(0.0).floor();
    let y0 = (min_y - pad_y).max(0.0).floor();
    let x1 = (max_x + pad_x).min(w).ceil();
    let y1 = (max_y + pad_y).min(h).ceil();

    if !(x1 > x0 && y1 > y0) || x0 >= w || y0 >= h {
        return None;
    }

    Some(CropRegion {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

/// Encoded still delivered to the session and the upload sink.
#[derive(Clone, PartialEq, Eq)]
pub struct StillImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Whether a face crop was applied.
    pub cropped: bool,
}

impl std::fmt::Debug for StillImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StillImage")
            .field("bytes", &self.png.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("cropped", &self.cropped)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameExtractor {
    pub layout: LandmarkLayout,
    pub crop_enabled: bool,
}

impl FrameExtractor {
    pub fn new(layout: LandmarkLayout, crop_enabled: bool) -> Self {
        Self {
            layout,
            crop_enabled,
        }
    }

    /// Encode `frame` as PNG, cropped to the face when enabled.
    ///
    /// Without usable landmarks the full frame is returned instead of failing
    /// the capture.
    pub fn extract(
        &self,
        frame: &Frame,
        face: Option<&FaceLandmarks>,
    ) -> Result<StillImage, CropError> {
        let rgba = frame.to_rgba_image();

        let region = if self.crop_enabled {
            let region =
                face.and_then(|f| face_region(f, &self.layout, frame.width, frame.height));
            if region.is_none() {
                tracing::warn!(
                    sequence = frame.sequence,
                    "no usable landmarks for crop, keeping full frame"
                );
            }
            region
        } else {
            None
        };

        let img = match region {
            Some(r) => imageops::crop_imm(&rgba, r.x, r.y, r.width, r.height).to_image(),
            None => rgba,
        };
        let (width, height) = img.dimensions();

        let mut png = Vec::new();
        DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        tracing::debug!(
            width,
            height,
            cropped = region.is_some(),
            bytes = png.len(),
            "still extracted"
        );

        Ok(StillImage {
            png,
            width,
            height,
            cropped: region.is_some(),
        })
    }
}
