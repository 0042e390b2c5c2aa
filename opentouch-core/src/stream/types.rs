//! Shared frame types for the capture/broadcast pipeline.

use std::time::Instant;

use bytes::Bytes;

use crate::error::StreamError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (DXGI default).
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Byte offsets of red, green and blue inside one pixel.
    pub const fn rgb_offsets(self) -> [usize; 3] {
        match self {
            PixelFormat::Bgra8 => [2, 1, 0],
            PixelFormat::Rgba8 | PixelFormat::Rgb8 => [0, 1, 2],
        }
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// A raw, uncompressed screen capture.
///
/// The `data` buffer holds `height` rows of `stride` bytes each.
/// `stride` may be larger than `width * bytes_per_pixel` due to
/// GPU row-alignment requirements. The buffer is immutable and
/// reference counted, so keeping a frame as a diff baseline is cheap.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row pitch in **bytes** (may exceed `width * bpp`).
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data, `stride * height` bytes.
    pub data: Bytes,
    /// Monotonic capture timestamp.
    pub timestamp: Instant,
}

impl RawFrame {
    /// Build a tightly packed frame (`stride == width * bpp`).
    pub fn packed(width: u32, height: u32, format: PixelFormat, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            stride: width * format.bytes_per_pixel() as u32,
            format,
            data: data.into(),
            timestamp: Instant::now(),
        }
    }

    /// Total byte size the raw bitmap occupies.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Bytes of visible pixels in one row (padding excluded).
    pub fn row_len(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Check that the buffer is large enough for the declared geometry.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.width == 0 || self.height == 0 {
            return Err(StreamError::InvalidFrame("zero-sized frame"));
        }
        if (self.stride as usize) < self.row_len() {
            return Err(StreamError::InvalidFrame("stride shorter than a row"));
        }
        if self.data.len() < self.byte_len() {
            return Err(StreamError::InvalidFrame("buffer shorter than stride * height"));
        }
        Ok(())
    }

    /// Returns the visible part of row `y` (padding excluded).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        &self.data[start..start + self.row_len()]
    }

    /// `true` if both frames share width, height and pixel format.
    pub fn same_geometry(&self, other: &RawFrame) -> bool {
        self.width == other.width && self.height == other.height && self.format == other.format
    }
}

// ── EncodedFrame ─────────────────────────────────────────────────

/// One compressed frame ready for network transmission.
///
/// Cloning shares the underlying buffer; every sink receives the
/// same immutable bytes.
pub type EncodedFrame = Bytes;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_pixel() {
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgb8.bytes_per_pixel(), 3);
    }

    #[test]
    fn packed_frame_geometry() {
        let frame = RawFrame::packed(4, 2, PixelFormat::Bgra8, vec![0u8; 32]);
        assert_eq!(frame.stride, 16);
        assert_eq!(frame.byte_len(), 32);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn row_skips_padding() {
        let mut data = vec![0u8; 2 * 12];
        data[12..20].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let frame = RawFrame {
            width: 2,
            height: 2,
            stride: 12,
            format: PixelFormat::Rgba8,
            data: data.into(),
            timestamp: Instant::now(),
        };
        assert_eq!(frame.row(1), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn validate_rejects_short_buffer() {
        let frame = RawFrame::packed(4, 4, PixelFormat::Rgb8, vec![0u8; 10]);
        assert!(matches!(frame.validate(), Err(StreamError::InvalidFrame(_))));
    }
}
