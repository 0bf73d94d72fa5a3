//! facecap-frame — Read-only camera frame buffers.
//!
//! Holds raw RGBA/RGB/grayscale/YUYV pixel data handed over by the
//! presentation layer and converts it for scoring, cropping and encoding.

pub mod frame;

pub use frame::{yuyv_to_rgb, Frame, FrameError, PixelFormat};
