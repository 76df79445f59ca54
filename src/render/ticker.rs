/// Horizontal position of the crawl.
///
/// `offset` starts at the frame width (fully off-screen right) and moves left by a fixed step per
/// frame. Once the text has fully left the screen (`offset < -text_width`) it restarts at the
/// frame width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickerState {
    offset: i64,
    text_width: i64,
    frame_width: i64,
}

impl TickerState {
    /// Ticker parked off-screen right of a `frame_width` wide frame.
    pub fn new(frame_width: u32) -> Self {
        let frame_width = i64::from(frame_width);
        Self {
            offset: frame_width,
            text_width: 0,
            frame_width,
        }
    }

    /// Current left edge of the crawl text.
    pub fn current_offset(&self) -> i64 {
        self.offset
    }

    /// Last measured crawl width.
    pub fn text_width(&self) -> i64 {
        self.text_width
    }

    /// Record the crawl width measured for the frame just rendered.
    pub fn set_text_width(&mut self, width: u32) {
        self.text_width = i64::from(width);
    }

    /// Move left by `step` pixels, wrapping once the text is fully off-screen left.
    pub fn advance(&mut self, step: u32) {
        self.offset -= i64::from(step);
        if self.offset < -self.text_width {
            self.offset = self.frame_width;
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/ticker.rs"]
mod tests;
