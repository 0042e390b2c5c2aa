//! Frame encoders.
//!
//! The capture loop asks an encoder to compress each emitted frame at
//! the quality currently chosen by the
//! [`QualityController`](crate::stream::QualityController). Frames are
//! encoded independently; there is no inter-frame state.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::{ImageBuffer, RgbImage};

use crate::error::StreamError;
use crate::stream::types::RawFrame;

/// Compresses a raw frame into a self-contained image buffer.
pub trait FrameEncoder: Send + Sync {
    /// Encode `frame` at `quality` (1..=100, higher is better).
    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>, StreamError>;
}

// ── JpegEncoder ──────────────────────────────────────────────────

/// Baseline JPEG encoder at native resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegEncoder;

impl JpegEncoder {
    /// Create a new encoder (no initialisation cost).
    pub fn new() -> Self {
        Self
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>, StreamError> {
        frame.validate()?;

        let rgb = to_packed_rgb(frame);
        let img: RgbImage = ImageBuffer::from_raw(frame.width, frame.height, rgb)
            .ok_or(StreamError::InvalidFrame("RGB buffer does not match dimensions"))?;

        let mut buf = Cursor::new(Vec::new());
        let encoder = ImageJpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        img.write_with_encoder(encoder)
            .map_err(|e| StreamError::Encode(format!("JPEG encode failed: {e}")))?;

        Ok(buf.into_inner())
    }
}

/// Convert any supported layout into tightly packed RGB.
fn to_packed_rgb(frame: &RawFrame) -> Vec<u8> {
    let bpp = frame.format.bytes_per_pixel();
    let [r, g, b] = frame.format.rgb_offsets();
    let mut out = Vec::with_capacity(frame.width as usize * frame.height as usize * 3);

    for y in 0..frame.height {
        for px in frame.row(y).chunks_exact(bpp) {
            out.extend_from_slice(&[px[r], px[g], px[b]]);
        }
    }
    out
}
