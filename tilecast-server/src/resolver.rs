//! Content resolution and palette quantization.
//!
//! The resolver maps content keys to image files under one configured
//! directory; keys are treated as untrusted input and may not escape
//! it. The quantizer is intentionally small: resize to the surface
//! dimensions, then nearest colour in a fixed built-in palette, one
//! byte per cell.

use std::path::{Component, Path, PathBuf};

use image::imageops::FilterType;
use tracing::debug;

use tilecast_core::error::CastError;
use tilecast_core::session::{ImageResolver, PaletteQuantizer};
use tilecast_core::types::{Bitmap, RASTER_LEN, SURFACE_HEIGHT, SURFACE_WIDTH};

// ── DirImageResolver ─────────────────────────────────────────────

/// Resolves content keys against one image directory.
pub struct DirImageResolver {
    root: PathBuf,
}

impl DirImageResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Reject keys that are absolute or contain parent components.
    fn sanitize(&self, key: &str) -> Result<PathBuf, CastError> {
        let rel = Path::new(key);
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !clean {
            return Err(CastError::FrameDecode(format!(
                "content key escapes image directory: {key}"
            )));
        }
        Ok(self.root.join(rel))
    }
}

impl ImageResolver for DirImageResolver {
    fn resolve(&self, key: &str) -> Result<Bitmap, CastError> {
        let path = self.sanitize(key)?;
        debug!(key, path = %path.display(), "resolving content");
        let bytes = std::fs::read(&path)
            .map_err(|e| CastError::FrameDecode(format!("{}: {e}", path.display())))?;
        Bitmap::from_encoded(&bytes)
    }
}

// ── BasePaletteQuantizer ─────────────────────────────────────────

/// Built-in colour palette; the raster byte is an index into this
/// table. Index 0 doubles as the transparent/blank cell.
const PALETTE: [[u8; 3]; 16] = [
    [0, 0, 0],
    [255, 255, 255],
    [127, 127, 127],
    [64, 64, 64],
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [0, 255, 255],
    [255, 0, 255],
    [191, 96, 0],
    [0, 96, 0],
    [96, 0, 0],
    [0, 0, 96],
    [255, 160, 64],
    [64, 160, 255],
];

/// Fixed-palette quantizer for the surface raster.
pub struct BasePaletteQuantizer;

impl BasePaletteQuantizer {
    fn nearest(rgb: [u8; 3]) -> u8 {
        let mut best = 0usize;
        let mut best_dist = u32::MAX;
        for (i, p) in PALETTE.iter().enumerate() {
            let dist = p
                .iter()
                .zip(rgb.iter())
                .map(|(&a, &b)| {
                    let d = a as i32 - b as i32;
                    (d * d) as u32
                })
                .sum();
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }
        best as u8
    }
}

impl PaletteQuantizer for BasePaletteQuantizer {
    fn quantize(&self, bitmap: &Bitmap) -> Vec<u8> {
        let img = image::RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.data.clone())
            .map(image::DynamicImage::ImageRgba8)
            .unwrap_or_else(|| {
                image::DynamicImage::new_rgba8(SURFACE_WIDTH as u32, SURFACE_HEIGHT as u32)
            });
        let scaled = img.resize_exact(
            SURFACE_WIDTH as u32,
            SURFACE_HEIGHT as u32,
            FilterType::Triangle,
        );
        let rgba = scaled.to_rgba8();

        let mut raster = Vec::with_capacity(RASTER_LEN);
        for px in rgba.pixels() {
            // Mostly-transparent cells map to the blank index.
            if px[3] < 128 {
                raster.push(0);
            } else {
                raster.push(Self::nearest([px[0], px[1], px[2]]));
            }
        }
        raster
    }
}

// ── Tests ────────────────────────────────────────────────────────
