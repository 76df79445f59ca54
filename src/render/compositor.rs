use crate::feed::alert::Alert;
use crate::foundation::core::{Point, Rect, Rgba8};
use crate::foundation::error::{AlertcastError, AlertcastResult};
use crate::render::canvas::{Canvas, FontWeight, TextStyle};
use crate::render::frame::{AuxImage, FrameRGBA};
use crate::render::layout::LayoutPolicy;

/// One backend-agnostic drawing operation.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawOp {
    /// Filled rectangle.
    Rect {
        /// Target rectangle.
        rect: Rect,
        /// Fill color.
        color: Rgba8,
    },
    /// Single-line text anchored at its top-left corner.
    Text {
        /// Top-left corner.
        origin: Point,
        /// Content.
        text: String,
        /// Style.
        style: TextStyle,
    },
    /// Auxiliary image scaled into `dest`.
    Image {
        /// Destination rectangle (aspect-preserving fit of the aux zone).
        dest: Rect,
    },
}

/// Content of the top banner.
#[derive(Clone, Debug, PartialEq)]
pub struct BannerPlan {
    /// Banner text.
    pub text: String,
    /// Fill color.
    pub fill: Rgba8,
    /// Whether the banner alert is in the urgent keyword class.
    pub urgent: bool,
}

/// Everything needed to draw one frame, in draw order.
#[derive(Clone, Debug, PartialEq)]
pub struct FramePlan {
    /// Clear color.
    pub background: Rgba8,
    /// Draw operations after the clear.
    pub ops: Vec<DrawOp>,
    /// Banner content; the neutral state when there are no alerts.
    pub banner: BannerPlan,
    /// Side panel entries (event names).
    pub panel_entries: Vec<String>,
    /// Full crawl string.
    pub crawl: String,
    /// Style used for the crawl, needed to measure it.
    pub crawl_style: TextStyle,
}

/// Output of [`Compositor::render`].
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedFrame {
    /// Frame pixels.
    pub frame: FrameRGBA,
    /// Measured crawl width in whole pixels (0 for an empty crawl).
    pub crawl_width: u32,
}

/// `"event - area"` entries joined by `separator`.
pub fn crawl_text(alerts: &[Alert], separator: &str) -> String {
    alerts
        .iter()
        .map(Alert::crawl_entry)
        .collect::<Vec<_>>()
        .join(separator)
}

/// Builds frames from the alert list, ticker offset and optional aux image.
///
/// Holds only the layout policy; the same inputs always produce the same plan and, on a given
/// canvas, the same pixels.
#[derive(Clone, Debug)]
pub struct Compositor {
    layout: LayoutPolicy,
}

impl Compositor {
    /// Validate `layout` and build a compositor for it.
    pub fn new(layout: LayoutPolicy) -> AlertcastResult<Self> {
        layout.validate()?;
        Ok(Self { layout })
    }

    /// Active layout.
    pub fn layout(&self) -> &LayoutPolicy {
        &self.layout
    }

    /// Lay out one frame without drawing it.
    ///
    /// `alerts` must already be ordered highest severity first.
    pub fn plan(&self, alerts: &[Alert], ticker_offset: i64, aux: Option<&AuxImage>) -> FramePlan {
        let l = &self.layout;
        let p = &l.palette;
        let mut ops = Vec::new();

        ops.push(DrawOp::Rect {
            rect: l.title_bar,
            color: p.title_bar,
        });
        ops.push(DrawOp::Text {
            origin: Point::new(l.title_bar.x0 + l.inset_px, l.title_bar.y0 + 5.0),
            text: l.title.clone(),
            style: TextStyle {
                size_px: l.text.title,
                color: p.title_text,
                weight: FontWeight::Bold,
            },
        });

        let banner = match alerts.first() {
            Some(top) => {
                let urgent = l.is_urgent(&top.event);
                BannerPlan {
                    text: format!("{} - {}", top.event, top.area),
                    fill: if urgent {
                        p.banner_urgent
                    } else {
                        p.banner_elevated
                    },
                    urgent,
                }
            }
            None => BannerPlan {
                text: l.empty_banner_text.clone(),
                fill: p.banner_neutral,
                urgent: false,
            },
        };
        ops.push(DrawOp::Rect {
            rect: l.banner,
            color: banner.fill,
        });
        ops.push(DrawOp::Text {
            origin: Point::new(l.banner.x0 + l.inset_px, l.banner.y0 + 12.0),
            text: banner.text.clone(),
            style: TextStyle {
                size_px: l.text.banner,
                color: if alerts.is_empty() {
                    p.banner_neutral_text
                } else {
                    p.banner_text
                },
                weight: FontWeight::Bold,
            },
        });

        ops.push(DrawOp::Rect {
            rect: l.panel,
            color: p.panel,
        });
        ops.push(DrawOp::Text {
            origin: Point::new(l.panel.x0 + l.inset_px, l.panel.y0 + 10.0),
            text: l.panel_heading.clone(),
            style: TextStyle {
                size_px: l.text.panel_heading,
                color: p.panel_heading,
                weight: FontWeight::Bold,
            },
        });
        let panel_entries: Vec<String> = alerts
            .iter()
            .take(l.panel_cap)
            .map(|a| a.event.clone())
            .collect();
        for (i, event) in panel_entries.iter().enumerate() {
            ops.push(DrawOp::Text {
                origin: Point::new(
                    l.panel.x0 + l.inset_px,
                    l.panel.y0 + 45.0 + l.panel_row_px * i as f64,
                ),
                text: event.clone(),
                style: TextStyle {
                    size_px: l.text.panel_entry,
                    color: p.panel_entry,
                    weight: FontWeight::Regular,
                },
            });
        }

        if let Some(img) = aux {
            ops.push(DrawOp::Image {
                dest: fit_rect(l.aux, img.width, img.height),
            });
        }

        ops.push(DrawOp::Rect {
            rect: l.ticker,
            color: p.ticker_band,
        });
        let crawl = crawl_text(alerts, &l.crawl_separator);
        let crawl_style = TextStyle {
            size_px: l.text.crawl,
            color: p.crawl_text,
            weight: FontWeight::Regular,
        };
        if !crawl.is_empty() {
            ops.push(DrawOp::Text {
                origin: Point::new(ticker_offset as f64, l.ticker.y0 + 15.0),
                text: crawl.clone(),
                style: crawl_style,
            });
        }

        FramePlan {
            background: p.background,
            ops,
            banner,
            panel_entries,
            crawl,
            crawl_style,
        }
    }

    /// Render one frame onto `canvas` and measure the crawl.
    pub fn render(
        &self,
        canvas: &mut dyn Canvas,
        alerts: &[Alert],
        ticker_offset: i64,
        aux: Option<&AuxImage>,
    ) -> AlertcastResult<RenderedFrame> {
        if canvas.size() != self.layout.size {
            let got = canvas.size();
            return Err(AlertcastError::validation(format!(
                "canvas size mismatch: got {}x{}, expected {}x{}",
                got.width, got.height, self.layout.size.width, self.layout.size.height
            )));
        }
        let plan = self.plan(alerts, ticker_offset, aux);
        execute_plan(canvas, &plan, aux)
    }
}

/// Draw `plan` onto `canvas`.
///
/// `aux` must be the image the plan was built with; image ops are skipped without one.
pub fn execute_plan(
    canvas: &mut dyn Canvas,
    plan: &FramePlan,
    aux: Option<&AuxImage>,
) -> AlertcastResult<RenderedFrame> {
    canvas.clear(plan.background)?;
    for op in &plan.ops {
        match op {
            DrawOp::Rect { rect, color } => canvas.fill_rect(*rect, *color)?,
            DrawOp::Text {
                origin,
                text,
                style,
            } => canvas.draw_text(*origin, text, style)?,
            DrawOp::Image { dest } => {
                if let Some(img) = aux {
                    canvas.draw_image(*dest, img)?;
                }
            }
        }
    }
    let width = canvas.measure_text(&plan.crawl, &plan.crawl_style)?;
    if !width.is_finite() || width < 0.0 {
        return Err(AlertcastError::render(format!(
            "canvas measured an invalid crawl width: {width}"
        )));
    }
    let frame = canvas.finish()?;
    Ok(RenderedFrame {
        frame,
        crawl_width: width.ceil() as u32,
    })
}

fn fit_rect(zone: Rect, width: u32, height: u32) -> Rect {
    let (w, h) = (f64::from(width.max(1)), f64::from(height.max(1)));
    let scale = (zone.width() / w).min(zone.height() / h);
    let (dw, dh) = (w * scale, h * scale);
    let x0 = zone.x0 + (zone.width() - dw) * 0.5;
    let y0 = zone.y0 + (zone.height() - dh) * 0.5;
    Rect::new(x0, y0, x0 + dw, y0 + dh)
}

#[cfg(test)]
#[path = "../../tests/unit/render/compositor.rs"]
mod tests;
