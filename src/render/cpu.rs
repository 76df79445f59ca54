use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use crate::foundation::core::{FrameSize, Point, Rect, Rgba8};
use crate::foundation::error::{AlertcastError, AlertcastResult};
use crate::render::canvas::{Canvas, FontWeight, TextStyle};
use crate::render::frame::{AuxImage, FrameRGBA};

/// Regular font shipped by most Debian/Ubuntu images.
pub const DEFAULT_REGULAR_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";
/// Bold companion of [`DEFAULT_REGULAR_FONT`].
pub const DEFAULT_BOLD_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct TextBrushRgba8 {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

/// Raw font files used by [`CpuCanvas`].
#[derive(Clone, Debug)]
pub struct FontBook {
    regular: Vec<u8>,
    bold: Option<Vec<u8>>,
}

impl FontBook {
    /// Font book from in-memory font files.
    pub fn from_bytes(regular: Vec<u8>, bold: Option<Vec<u8>>) -> AlertcastResult<Self> {
        if regular.is_empty() {
            return Err(AlertcastError::validation("regular font bytes are empty"));
        }
        Ok(Self { regular, bold })
    }

    /// Read font files from disk.
    pub fn load(regular: &Path, bold: Option<&Path>) -> AlertcastResult<Self> {
        let regular_bytes = std::fs::read(regular)
            .with_context(|| format!("read font '{}'", regular.display()))?;
        let bold_bytes = match bold {
            Some(p) => Some(
                std::fs::read(p).with_context(|| format!("read font '{}'", p.display()))?,
            ),
            None => None,
        };
        Self::from_bytes(regular_bytes, bold_bytes)
    }
}

struct RegisteredFace {
    family: String,
    font: vello_cpu::peniko::FontData,
}

/// CPU raster canvas powered by `vello_cpu`, with `parley` text layout.
///
/// Produces premultiplied RGBA8 frames. Render and layout contexts are reused across frames.
pub struct CpuCanvas {
    size: FrameSize,
    ctx: vello_cpu::RenderContext,
    pixmap: vello_cpu::Pixmap,
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrushRgba8>,
    regular: RegisteredFace,
    bold: Option<RegisteredFace>,
    image_cache: Option<(Arc<Vec<u8>>, vello_cpu::Image)>,
}

impl CpuCanvas {
    /// Create a canvas and register the fonts from `fonts`.
    pub fn new(size: FrameSize, fonts: FontBook) -> AlertcastResult<Self> {
        let w: u16 = size
            .width
            .try_into()
            .map_err(|_| AlertcastError::validation("canvas width exceeds u16"))?;
        let h: u16 = size
            .height
            .try_into()
            .map_err(|_| AlertcastError::validation("canvas height exceeds u16"))?;
        if w == 0 || h == 0 {
            return Err(AlertcastError::validation(
                "canvas width/height must be non-zero",
            ));
        }

        let mut font_ctx = parley::FontContext::default();
        let regular = register_face(&mut font_ctx, fonts.regular)?;
        let bold = match fonts.bold {
            Some(bytes) => Some(register_face(&mut font_ctx, bytes)?),
            None => None,
        };

        Ok(Self {
            size,
            ctx: vello_cpu::RenderContext::new(w, h),
            pixmap: vello_cpu::Pixmap::new(w, h),
            font_ctx,
            layout_ctx: parley::LayoutContext::new(),
            regular,
            bold,
            image_cache: None,
        })
    }

    fn layout(
        &mut self,
        text: &str,
        style: &TextStyle,
    ) -> AlertcastResult<(parley::Layout<TextBrushRgba8>, vello_cpu::peniko::FontData)> {
        if !style.size_px.is_finite() || style.size_px <= 0.0 {
            return Err(AlertcastError::validation(
                "text size_px must be finite and > 0",
            ));
        }
        let face = match style.weight {
            FontWeight::Bold => self.bold.as_ref().unwrap_or(&self.regular),
            FontWeight::Regular => &self.regular,
        };
        let family = face.family.clone();
        let font = face.font.clone();
        let brush = TextBrushRgba8 {
            r: style.color.r,
            g: style.color.g,
            b: style.color.b,
            a: style.color.a,
        };

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(family)),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(style.size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<TextBrushRgba8> = builder.build(text);
        layout.break_all_lines(None);
        Ok((layout, font))
    }

    fn image_paint(&mut self, image: &AuxImage) -> AlertcastResult<vello_cpu::Image> {
        if let Some((bytes, paint)) = &self.image_cache
            && Arc::ptr_eq(bytes, &image.rgba8_premul)
        {
            return Ok(paint.clone());
        }
        let pixmap = pixmap_from_premul_bytes(&image.rgba8_premul, image.width, image.height)?;
        let paint = vello_cpu::Image {
            image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
            sampler: vello_cpu::peniko::ImageSampler::default(),
        };
        self.image_cache = Some((Arc::clone(&image.rgba8_premul), paint.clone()));
        Ok(paint)
    }
}

impl Canvas for CpuCanvas {
    fn size(&self) -> FrameSize {
        self.size
    }

    fn clear(&mut self, color: Rgba8) -> AlertcastResult<()> {
        self.ctx.reset();
        self.ctx.set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
        self.fill_rect(
            Rect::new(
                0.0,
                0.0,
                f64::from(self.size.width),
                f64::from(self.size.height),
            ),
            color,
        )
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba8) -> AlertcastResult<()> {
        self.ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
        self.ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
            color.r, color.g, color.b, color.a,
        ));
        self.ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            rect.x0, rect.y0, rect.x1, rect.y1,
        ));
        Ok(())
    }

    fn measure_text(&mut self, text: &str, style: &TextStyle) -> AlertcastResult<f32> {
        if text.is_empty() {
            return Ok(0.0);
        }
        let (layout, _) = self.layout(text, style)?;
        Ok(layout
            .lines()
            .map(|line| line.metrics().advance)
            .fold(0.0f32, f32::max))
    }

    fn draw_text(&mut self, origin: Point, text: &str, style: &TextStyle) -> AlertcastResult<()> {
        if text.is_empty() {
            return Ok(());
        }
        let (layout, font) = self.layout(text, style)?;
        self.ctx
            .set_transform(vello_cpu::kurbo::Affine::translate((origin.x, origin.y)));
        for line in layout.lines() {
            for item in line.items() {
                let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                    continue;
                };
                let brush = run.style().brush;
                self.ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                    brush.r, brush.g, brush.b, brush.a,
                ));
                let glyphs = run.positioned_glyphs().map(|g| vello_cpu::Glyph {
                    id: g.id,
                    x: g.x,
                    y: g.y,
                });
                self.ctx
                    .glyph_run(&font)
                    .font_size(run.run().font_size())
                    .fill_glyphs(glyphs);
            }
        }
        Ok(())
    }

    fn draw_image(&mut self, dest: Rect, image: &AuxImage) -> AlertcastResult<()> {
        if dest.width() <= 0.0 || dest.height() <= 0.0 {
            return Ok(());
        }
        let paint = self.image_paint(image)?;
        let sx = dest.width() / f64::from(image.width);
        let sy = dest.height() / f64::from(image.height);
        self.ctx.set_transform(
            vello_cpu::kurbo::Affine::translate((dest.x0, dest.y0))
                * vello_cpu::kurbo::Affine::scale_non_uniform(sx, sy),
        );
        self.ctx.set_paint(paint);
        self.ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            f64::from(image.width),
            f64::from(image.height),
        ));
        Ok(())
    }

    fn finish(&mut self) -> AlertcastResult<FrameRGBA> {
        self.ctx.flush();
        self.ctx.render_to_pixmap(&mut self.pixmap);
        Ok(FrameRGBA {
            width: self.size.width,
            height: self.size.height,
            data: self.pixmap.data_as_u8_slice().to_vec(),
            premultiplied: true,
        })
    }
}

fn register_face(
    font_ctx: &mut parley::FontContext,
    bytes: Vec<u8>,
) -> AlertcastResult<RegisteredFace> {
    let families = font_ctx
        .collection
        .register_fonts(parley::fontique::Blob::from(bytes.clone()), None);
    let family_id = families
        .first()
        .map(|(id, _)| *id)
        .ok_or_else(|| AlertcastError::validation("no font families registered from font bytes"))?;
    let family = font_ctx
        .collection
        .family_name(family_id)
        .ok_or_else(|| AlertcastError::validation("registered font family has no name"))?
        .to_string();
    Ok(RegisteredFace {
        family,
        font: vello_cpu::peniko::FontData::new(vello_cpu::peniko::Blob::from(bytes), 0),
    })
}

fn pixmap_from_premul_bytes(
    bytes: &[u8],
    width: u32,
    height: u32,
) -> AlertcastResult<vello_cpu::Pixmap> {
    let w: u16 = width
        .try_into()
        .map_err(|_| AlertcastError::render("pixmap width exceeds u16"))?;
    let h: u16 = height
        .try_into()
        .map_err(|_| AlertcastError::render("pixmap height exceeds u16"))?;
    let expected = FrameSize { width, height }.rgba_len();
    if bytes.len() != expected {
        return Err(AlertcastError::render("pixmap byte len mismatch"));
    }
    // Pixmap stores PremulRgba8; aux image bytes are already premultiplied.
    let mut pixels = Vec::<vello_cpu::peniko::color::PremulRgba8>::with_capacity(
        (width as usize) * (height as usize),
    );
    for px in bytes.chunks_exact(4) {
        pixels.push(vello_cpu::peniko::color::PremulRgba8::from_u8_array([
            px[0], px[1], px[2], px[3],
        ]));
    }
    Ok(vello_cpu::Pixmap::from_parts_with_opacity(pixels, w, h, true))
}

#[cfg(test)]
#[path = "../../tests/unit/render/cpu.rs"]
mod tests;
