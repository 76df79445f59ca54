use std::sync::Arc;

use anyhow::Context as _;

use crate::foundation::core::FrameSize;
use crate::foundation::error::{AlertcastError, AlertcastResult};
use crate::foundation::math::premultiply_rgba8_in_place;

/// A rendered frame as RGBA8 pixels.
///
/// Frames produced by the canvases in this crate are **premultiplied alpha**; the flag makes this
/// explicit at the sink boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRGBA {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, row-major.
    pub data: Vec<u8>,
    /// Whether the `data` is premultiplied alpha.
    pub premultiplied: bool,
}

impl FrameRGBA {
    /// Frame dimensions.
    pub fn size(&self) -> FrameSize {
        FrameSize {
            width: self.width,
            height: self.height,
        }
    }

    /// RGBA bytes of the pixel at `(x, y)`, if inside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let px = self.data.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Externally supplied image (for example a map snapshot), premultiplied RGBA8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel bytes in row-major premultiplied RGBA8.
    pub rgba8_premul: Arc<Vec<u8>>,
}

impl AuxImage {
    /// Wrap premultiplied bytes, checking the length against the dimensions.
    pub fn from_premul(width: u32, height: u32, rgba8_premul: Vec<u8>) -> AlertcastResult<Self> {
        if width == 0 || height == 0 {
            return Err(AlertcastError::validation(
                "aux image width/height must be non-zero",
            ));
        }
        let expected = FrameSize { width, height }.rgba_len();
        if rgba8_premul.len() != expected {
            return Err(AlertcastError::validation(format!(
                "aux image byte len mismatch: got {}, expected {expected}",
                rgba8_premul.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgba8_premul: Arc::new(rgba8_premul),
        })
    }

    /// Decode an encoded image (PNG, JPEG, ...) and premultiply it.
    pub fn decode(bytes: &[u8]) -> AlertcastResult<Self> {
        let dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;
        let rgba = dyn_img.to_rgba8();
        let (width, height) = rgba.dimensions();

        let mut rgba8_premul = rgba.into_raw();
        premultiply_rgba8_in_place(&mut rgba8_premul);
        Self::from_premul(width, height, rgba8_premul)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/frame.rs"]
mod tests;
