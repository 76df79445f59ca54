use crate::foundation::core::{FrameSize, Point, Rect, Rgba8};
use crate::foundation::error::{AlertcastError, AlertcastResult};
use crate::render::frame::{AuxImage, FrameRGBA};

/// Font weight selector; canvases without a bold face fall back to regular.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FontWeight {
    /// Regular face.
    Regular,
    /// Bold face.
    Bold,
}

/// Text styling for a single run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextStyle {
    /// Font size in pixels.
    pub size_px: f32,
    /// Straight-alpha fill color.
    pub color: Rgba8,
    /// Face to use.
    pub weight: FontWeight,
}

/// Opaque drawing capability used by the compositor.
///
/// One canvas is reused for every frame: `clear` starts a frame, `finish` reads it back. Drawing
/// is clipped to the canvas bounds.
pub trait Canvas {
    /// Canvas dimensions.
    fn size(&self) -> FrameSize;

    /// Start a new frame filled with `color`.
    fn clear(&mut self, color: Rgba8) -> AlertcastResult<()>;

    /// Fill an axis-aligned rectangle.
    fn fill_rect(&mut self, rect: Rect, color: Rgba8) -> AlertcastResult<()>;

    /// Horizontal advance of `text` in pixels. Empty text measures 0.
    fn measure_text(&mut self, text: &str, style: &TextStyle) -> AlertcastResult<f32>;

    /// Draw a single line of text with its top-left corner at `origin`.
    fn draw_text(&mut self, origin: Point, text: &str, style: &TextStyle) -> AlertcastResult<()>;

    /// Draw `image` scaled into `dest`.
    fn draw_image(&mut self, dest: Rect, image: &AuxImage) -> AlertcastResult<()>;

    /// Read back the current frame.
    fn finish(&mut self) -> AlertcastResult<FrameRGBA>;
}

/// Draw call captured by [`RecordingCanvas`].
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedOp {
    /// `clear`.
    Clear(Rgba8),
    /// `fill_rect`.
    Rect {
        /// Target rectangle.
        rect: Rect,
        /// Fill color.
        color: Rgba8,
    },
    /// `draw_text`.
    Text {
        /// Top-left corner.
        origin: Point,
        /// Text content.
        text: String,
        /// Style used.
        style: TextStyle,
    },
    /// `draw_image`.
    Image {
        /// Destination rectangle.
        dest: Rect,
        /// Source width.
        width: u32,
        /// Source height.
        height: u32,
    },
}

/// Deterministic canvas for tests and debugging.
///
/// Rectangles and images are rasterized into straight RGBA8 with nearest-neighbour sampling; text
/// is recorded but not rasterized. Text advance is `chars * size_px * advance_em`.
#[derive(Clone, Debug)]
pub struct RecordingCanvas {
    size: FrameSize,
    advance_em: f32,
    pixels: Vec<u8>,
    ops: Vec<RecordedOp>,
}

impl RecordingCanvas {
    /// Canvas of `width` x `height` with a 0.5 em fixed advance.
    pub fn new(width: u32, height: u32) -> Self {
        let size = FrameSize { width, height };
        Self {
            size,
            advance_em: 0.5,
            pixels: vec![0u8; size.rgba_len()],
            ops: Vec::new(),
        }
    }

    /// Draw calls since the last `clear`.
    pub fn ops(&self) -> &[RecordedOp] {
        &self.ops
    }

    /// Text runs since the last `clear`, in draw order.
    pub fn texts(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn pixel_bounds(&self, rect: Rect) -> Option<(usize, usize, usize, usize)> {
        let x0 = rect.x0.max(0.0).round() as usize;
        let y0 = rect.y0.max(0.0).round() as usize;
        let x1 = (rect.x1.round().max(0.0) as usize).min(self.size.width as usize);
        let y1 = (rect.y1.round().max(0.0) as usize).min(self.size.height as usize);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some((x0, y0, x1, y1))
    }
}

impl Canvas for RecordingCanvas {
    fn size(&self) -> FrameSize {
        self.size
    }

    fn clear(&mut self, color: Rgba8) -> AlertcastResult<()> {
        let rgba = color.to_array();
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        self.ops.clear();
        self.ops.push(RecordedOp::Clear(color));
        Ok(())
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba8) -> AlertcastResult<()> {
        self.ops.push(RecordedOp::Rect { rect, color });
        let Some((x0, y0, x1, y1)) = self.pixel_bounds(rect) else {
            return Ok(());
        };
        let rgba = color.to_array();
        let stride = self.size.width as usize * 4;
        for y in y0..y1 {
            let row = &mut self.pixels[y * stride + x0 * 4..y * stride + x1 * 4];
            for px in row.chunks_exact_mut(4) {
                px.copy_from_slice(&rgba);
            }
        }
        Ok(())
    }

    fn measure_text(&mut self, text: &str, style: &TextStyle) -> AlertcastResult<f32> {
        if !style.size_px.is_finite() || style.size_px <= 0.0 {
            return Err(AlertcastError::validation(
                "text size_px must be finite and > 0",
            ));
        }
        Ok(text.chars().count() as f32 * style.size_px * self.advance_em)
    }

    fn draw_text(&mut self, origin: Point, text: &str, style: &TextStyle) -> AlertcastResult<()> {
        self.measure_text(text, style)?;
        self.ops.push(RecordedOp::Text {
            origin,
            text: text.to_string(),
            style: *style,
        });
        Ok(())
    }

    fn draw_image(&mut self, dest: Rect, image: &AuxImage) -> AlertcastResult<()> {
        self.ops.push(RecordedOp::Image {
            dest,
            width: image.width,
            height: image.height,
        });
        let Some((x0, y0, x1, y1)) = self.pixel_bounds(dest) else {
            return Ok(());
        };
        let dw = dest.width().max(1.0);
        let dh = dest.height().max(1.0);
        let stride = self.size.width as usize * 4;
        for y in y0..y1 {
            let sy = (((y as f64 + 0.5 - dest.y0) / dh) * f64::from(image.height)) as usize;
            let sy = sy.min(image.height as usize - 1);
            for x in x0..x1 {
                let sx = (((x as f64 + 0.5 - dest.x0) / dw) * f64::from(image.width)) as usize;
                let sx = sx.min(image.width as usize - 1);
                let si = (sy * image.width as usize + sx) * 4;
                let di = y * stride + x * 4;
                self.pixels[di..di + 4].copy_from_slice(&image.rgba8_premul[si..si + 4]);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> AlertcastResult<FrameRGBA> {
        Ok(FrameRGBA {
            width: self.size.width,
            height: self.size.height,
            data: self.pixels.clone(),
            premultiplied: false,
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/canvas.rs"]
mod tests;
