use crate::foundation::core::FrameIndex;
use crate::foundation::error::{AlertcastError, AlertcastResult};
use crate::render::frame::FrameRGBA;

/// Sink lifecycle.
///
/// `Stopped -> Starting -> Running -> Failed -> Starting -> ...`. `Running -> Failed` happens when a
/// write fails. A sink never leaves `Failed` on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SinkState {
    /// No encoder process.
    Stopped,
    /// `start` is in progress.
    Starting,
    /// Accepting frames.
    Running,
    /// Last write or start failed; waiting for `start`.
    Failed,
}

/// Byte sink with a lifecycle, consuming one raw frame per `write`.
///
/// Ordering contract: `write` is called with strictly increasing `FrameIndex` values. Indices
/// may skip (dropped frames) but never repeat.
pub trait FrameSink: Send {
    /// Launch (or relaunch) the encoder. On error the sink is `Failed`.
    fn start(&mut self) -> AlertcastResult<()>;
    /// Push one frame. On error the sink is `Failed` and the frame is lost.
    fn write(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> AlertcastResult<()>;
    /// Terminate the encoder and release it. The sink ends `Stopped`.
    fn stop(&mut self) -> AlertcastResult<()>;
    /// Current lifecycle state.
    fn state(&self) -> SinkState;
}

/// In-memory sink for tests and debugging.
#[derive(Debug)]
pub struct InMemorySink {
    state: SinkState,
    starts: usize,
    /// Frames in write order.
    pub(crate) frames: Vec<(FrameIndex, FrameRGBA)>,
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySink {
    /// Create a stopped in-memory sink.
    pub fn new() -> Self {
        Self {
            state: SinkState::Stopped,
            starts: 0,
            frames: Vec::new(),
        }
    }

    /// Borrow the captured frames.
    pub fn frames(&self) -> &[(FrameIndex, FrameRGBA)] {
        &self.frames
    }

    /// Number of successful `start` calls.
    pub fn starts(&self) -> usize {
        self.starts
    }
}

impl FrameSink for InMemorySink {
    fn start(&mut self) -> AlertcastResult<()> {
        self.state = SinkState::Running;
        self.starts += 1;
        Ok(())
    }

    fn write(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> AlertcastResult<()> {
        if self.state != SinkState::Running {
            return Err(AlertcastError::encode("in-memory sink is not running"));
        }
        if let Some((last, _)) = self.frames.last()
            && idx <= *last
        {
            self.state = SinkState::Failed;
            return Err(AlertcastError::encode(
                "in-memory sink received out-of-order frame index",
            ));
        }
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn stop(&mut self) -> AlertcastResult<()> {
        self.state = SinkState::Stopped;
        Ok(())
    }

    fn state(&self) -> SinkState {
        self.state
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/sink.rs"]
mod tests;
