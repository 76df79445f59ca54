use crate::foundation::core::{FrameSize, Rect, Rgba8};
use crate::foundation::error::{AlertcastError, AlertcastResult};

/// Colors used by the overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette {
    /// Frame background.
    pub background: Rgba8,
    /// Title bar fill.
    pub title_bar: Rgba8,
    /// Title text.
    pub title_text: Rgba8,
    /// Banner fill for urgent-class events.
    pub banner_urgent: Rgba8,
    /// Banner fill for every other event.
    pub banner_elevated: Rgba8,
    /// Banner fill when there are no alerts.
    pub banner_neutral: Rgba8,
    /// Banner text on urgent/elevated fills.
    pub banner_text: Rgba8,
    /// Banner text on the neutral fill.
    pub banner_neutral_text: Rgba8,
    /// Side panel fill.
    pub panel: Rgba8,
    /// Side panel heading.
    pub panel_heading: Rgba8,
    /// Side panel entries.
    pub panel_entry: Rgba8,
    /// Ticker band fill.
    pub ticker_band: Rgba8,
    /// Crawl text.
    pub crawl_text: Rgba8,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            background: Rgba8::rgb(18, 20, 28),
            title_bar: Rgba8::rgb(0, 0, 0),
            title_text: Rgba8::rgb(255, 255, 255),
            banner_urgent: Rgba8::rgb(255, 0, 0),
            banner_elevated: Rgba8::rgb(255, 140, 0),
            banner_neutral: Rgba8::rgb(40, 44, 56),
            banner_text: Rgba8::rgb(0, 0, 0),
            banner_neutral_text: Rgba8::rgb(200, 200, 200),
            panel: Rgba8::rgb(20, 20, 20),
            panel_heading: Rgba8::rgb(255, 255, 255),
            panel_entry: Rgba8::rgb(255, 0, 0),
            ticker_band: Rgba8::rgb(0, 0, 0),
            crawl_text: Rgba8::rgb(255, 0, 0),
        }
    }
}

/// Text sizes in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextSizes {
    /// Title bar.
    pub title: f32,
    /// Banner.
    pub banner: f32,
    /// Side panel heading.
    pub panel_heading: f32,
    /// Side panel entries.
    pub panel_entry: f32,
    /// Crawl.
    pub crawl: f32,
}

impl Default for TextSizes {
    fn default() -> Self {
        Self {
            title: 30.0,
            banner: 22.0,
            panel_heading: 22.0,
            panel_entry: 18.0,
            crawl: 22.0,
        }
    }
}

/// Overlay layout: named zones, palette and text policy.
#[derive(Clone, Debug, PartialEq)]
pub struct LayoutPolicy {
    /// Frame dimensions the zones are laid out for.
    pub size: FrameSize,
    /// Title bar text.
    pub title: String,
    /// Top title bar.
    pub title_bar: Rect,
    /// Highest-severity alert banner.
    pub banner: Rect,
    /// Side panel listing alert names.
    pub panel: Rect,
    /// Maximum number of side panel entries.
    pub panel_cap: usize,
    /// Vertical distance between side panel entries.
    pub panel_row_px: f64,
    /// Region for the auxiliary image.
    pub aux: Rect,
    /// Bottom crawl band.
    pub ticker: Rect,
    /// Joins crawl entries.
    pub crawl_separator: String,
    /// Events containing any of these words use the urgent banner color.
    pub urgent_keywords: Vec<String>,
    /// Banner text when no alert is active.
    pub empty_banner_text: String,
    /// Side panel heading.
    pub panel_heading: String,
    /// Colors.
    pub palette: Palette,
    /// Text sizes.
    pub text: TextSizes,
    /// Horizontal text inset inside zones.
    pub inset_px: f64,
}

const PANEL_WIDTH: f64 = 270.0;
const PANEL_MARGIN: f64 = 10.0;
const PANEL_HEADER_PX: f64 = 45.0;

impl LayoutPolicy {
    /// Default zones for `size`: title bar, banner, right-hand panel, aux region, crawl band.
    pub fn for_size(size: FrameSize, title: impl Into<String>, panel_cap: usize) -> Self {
        let w = f64::from(size.width);
        let h = f64::from(size.height);
        let panel_row_px = 24.0;
        let panel_x0 = w - PANEL_WIDTH - PANEL_MARGIN;
        let panel_h = PANEL_HEADER_PX + panel_row_px * panel_cap as f64 + PANEL_MARGIN;
        let ticker = Rect::new(0.0, h - 60.0, w, h);
        Self {
            size,
            title: title.into(),
            title_bar: Rect::new(0.0, 0.0, w, 40.0),
            banner: Rect::new(0.0, 50.0, w, 100.0),
            panel: Rect::new(panel_x0, 110.0, w - PANEL_MARGIN, 110.0 + panel_h),
            panel_cap,
            panel_row_px,
            aux: Rect::new(PANEL_MARGIN, 110.0, panel_x0 - PANEL_MARGIN, ticker.y0 - PANEL_MARGIN),
            ticker,
            crawl_separator: " | ".to_string(),
            urgent_keywords: vec!["Tornado".to_string()],
            empty_banner_text: "No active alerts".to_string(),
            panel_heading: "Active Warnings".to_string(),
            palette: Palette::default(),
            text: TextSizes::default(),
            inset_px: 10.0,
        }
    }

    /// Check that every zone fits in the frame and does not collapse.
    pub fn validate(&self) -> AlertcastResult<()> {
        if self.panel_cap == 0 {
            return Err(AlertcastError::validation("panel cap must be non-zero"));
        }
        let frame = Rect::new(
            0.0,
            0.0,
            f64::from(self.size.width),
            f64::from(self.size.height),
        );
        let zones = [
            ("title bar", self.title_bar),
            ("banner", self.banner),
            ("panel", self.panel),
            ("aux", self.aux),
            ("ticker", self.ticker),
        ];
        for (name, zone) in zones {
            if zone.width() <= 0.0 || zone.height() <= 0.0 {
                return Err(AlertcastError::validation(format!(
                    "layout zone '{name}' is empty at {}x{}",
                    self.size.width, self.size.height
                )));
            }
            if frame.intersect(zone) != zone {
                return Err(AlertcastError::validation(format!(
                    "layout zone '{name}' does not fit in {}x{}",
                    self.size.width, self.size.height
                )));
            }
        }
        Ok(())
    }

    /// `true` when `event` belongs to the urgent keyword class.
    pub fn is_urgent(&self, event: &str) -> bool {
        self.urgent_keywords
            .iter()
            .any(|k| !k.is_empty() && event.contains(k.as_str()))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/layout.rs"]
mod tests;
