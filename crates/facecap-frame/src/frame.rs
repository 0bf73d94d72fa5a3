//! Frame type and pixel conversions — YUYV unpacking, RGB access, image interop.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit RGBA, 4 bytes/pixel (canvas `ImageData` layout).
    Rgba8,
    /// 8-bit RGB, 3 bytes/pixel.
    Rgb8,
    /// 8-bit grayscale, 1 byte/pixel.
    Gray8,
    /// YUYV 4:2:2 packed, 2 bytes/pixel: [Y0, U, Y1, V] per pixel pair.
    Yuyv,
}

impl PixelFormat {
    /// Number of bytes a `width × height` buffer occupies in this format.
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgba8 => pixels * 4,
            PixelFormat::Rgb8 => pixels * 3,
            PixelFormat::Gray8 => pixels,
            PixelFormat::Yuyv => pixels * 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid {format:?} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("frame has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("YUYV frames need an even width, got {0}")]
    OddYuyvWidth(u32),
}

/// A single captured video frame. Never mutated once handed to the engine.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Wrap a raw buffer, validating its length against the pixel format.
    ///
    /// Trailing bytes beyond the expected length (driver padding) are dropped.
    pub fn new(
        mut data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }
        if format == PixelFormat::Yuyv && width % 2 != 0 {
            return Err(FrameError::OddYuyvWidth(width));
        }
        let expected = format.buffer_len(width, height);
        if data.len() < expected {
            return Err(FrameError::InvalidLength {
                format,
                expected,
                actual: data.len(),
            });
        }
        data.truncate(expected);

        Ok(Self {
            data,
            width,
            height,
            format,
            timestamp: Instant::now(),
            sequence: 0,
        })
    }

    /// Tag the frame with the source's sequence number.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Convert a decoded image into an RGBA frame.
    pub fn from_dynamic_image(img: &DynamicImage) -> Result<Self, FrameError> {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::new(rgba.into_raw(), width, height, PixelFormat::Rgba8)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// RGB value of the pixel at linear index `idx` (row-major).
    pub fn rgb_at(&self, idx: usize) -> [u8; 3] {
        match self.format {
            PixelFormat::Rgba8 => {
                let o = idx * 4;
                [self.data[o], self.data[o + 1], self.data[o + 2]]
            }
            PixelFormat::Rgb8 => {
                let o = idx * 3;
                [self.data[o], self.data[o + 1], self.data[o + 2]]
            }
            PixelFormat::Gray8 => {
                let v = self.data[idx];
                [v, v, v]
            }
            PixelFormat::Yuyv => {
                let base = (idx / 2) * 4;
                let y = self.data[base + (idx % 2) * 2];
                yuv_to_rgb(y, self.data[base + 1], self.data[base + 3])
            }
        }
    }

    /// Iterate all pixels as RGB triples in row-major order.
    pub fn rgb_pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        (0..self.pixel_count()).map(move |i| self.rgb_at(i))
    }

    /// Expand the frame into an owned RGBA image (alpha = 255 unless the
    /// source already carries alpha).
    pub fn to_rgba_image(&self) -> RgbaImage {
        let raw = match self.format {
            PixelFormat::Rgba8 => self.data.clone(),
            PixelFormat::Yuyv => match yuyv_to_rgb(&self.data, self.width, self.height) {
                Ok(rgb) => rgb
                    .chunks_exact(3)
                    .flat_map(|p| [p[0], p[1], p[2], 255])
                    .collect(),
                Err(e) => {
                    tracing::warn!(error = %e, sequence = self.sequence, "bad YUYV buffer");
                    Vec::new()
                }
            },
            _ => {
                let mut out = Vec::with_capacity(self.pixel_count() * 4);
                for [r, g, b] in self.rgb_pixels() {
                    out.extend_from_slice(&[r, g, b, 255]);
                }
                out
            }
        };
        // Length is exact by construction.
        RgbaImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    /// Downsample (or upsample) to `width × height` with a triangle filter.
    ///
    /// The result is RGBA and keeps the source timestamp and sequence.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        let width = width.max(1);
        let height = height.max(1);
        let rgba = self.to_rgba_image();
        let scaled = if (width, height) == (self.width, self.height) {
            rgba
        } else {
            imageops::resize(&rgba, width, height, FilterType::Triangle)
        };
        tracing::trace!(
            from = ?(self.width, self.height),
            to = ?(width, height),
            "resized frame"
        );
        Frame {
            data: scaled.into_raw(),
            width,
            height,
            format: PixelFormat::Rgba8,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }
}

/// BT.601 full-range YUV → RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

/// Convert packed YUYV (4:2:2) to packed RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = PixelFormat::Yuyv.buffer_len(width, height);
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            format: PixelFormat::Yuyv,
            expected,
            actual: yuyv.len(),
        });
    }
    let mut rgb = Vec::with_capacity(expected / 2 * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}
