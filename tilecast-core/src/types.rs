//! Shared types for the frame ingestion / synthesis / dispatch pipeline.
//!
//! These are **internal** representations flowing between pipeline stages.
//! The serialisable *wire* types live in [`crate::wire`].

use serde::{Deserialize, Serialize};

use crate::error::CastError;

// ── Surface geometry ─────────────────────────────────────────────

/// Width of one display surface in raster cells.
pub const SURFACE_WIDTH: usize = 128;

/// Height of one display surface in raster cells.
pub const SURFACE_HEIGHT: usize = 128;

/// Length of a full-surface raster: one palette byte per cell.
pub const RASTER_LEN: usize = SURFACE_WIDTH * SURFACE_HEIGHT;

// ── SurfaceId ────────────────────────────────────────────────────

/// Identifier of one addressable display surface.
///
/// Ids come from a pre-reserved pool exclusive to this subsystem
/// (see [`crate::surface::SurfacePool`]); this type never invents
/// its own values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub i32);

impl SurfaceId {
    /// The canonical single-integer constructor.
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Raw integer value.
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Bitmap ───────────────────────────────────────────────────────

/// A decoded image frame: RGBA8 pixels, row-major, no padding.
///
/// Ephemeral — produced by the demuxer or the image resolver and
/// consumed immediately by the palette quantizer. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGBA pixel data — `width * height * 4` bytes.
    pub data: Vec<u8>,
}

impl Bitmap {
    /// Wrap raw RGBA8 pixel data.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CastError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(CastError::Other(format!(
                "bitmap data length {} does not match {width}x{height} RGBA ({expected})",
                data.len(),
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Decode an encoded image (JPEG, PNG) into a bitmap.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, CastError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| CastError::FrameDecode(e.to_string()))?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            data: rgba.into_raw(),
        })
    }

    /// Total byte size of the pixel buffer.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// RGBA bytes of the pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        &self.data[offset..offset + 4]
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_from_rgba8_checks_length() {
        assert!(Bitmap::from_rgba8(2, 2, vec![0u8; 16]).is_ok());
        assert!(Bitmap::from_rgba8(2, 2, vec![0u8; 15]).is_err());
    }

    #[test]
    fn bitmap_pixel_access() {
        let mut data = vec![0u8; 16];
        data[12..16].copy_from_slice(&[1, 2, 3, 4]);
        let bmp = Bitmap::from_rgba8(2, 2, data).unwrap();
        assert_eq!(bmp.pixel(1, 1), &[1, 2, 3, 4]);
    }

    #[test]
    fn from_encoded_rejects_garbage() {
        let err = Bitmap::from_encoded(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(matches!(err, Err(CastError::FrameDecode(_))));
    }

    #[test]
    fn surface_id_display() {
        assert_eq!(SurfaceId::new(42).to_string(), "42");
        assert_eq!(SurfaceId::new(42).value(), 42);
    }
}
