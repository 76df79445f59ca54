//! Alertcast renders a continuously refreshed severe-weather alert overlay and streams it as raw
//! frames into an external encoder.
//!
//! The pieces:
//!
//! - [`AlertSource`] implementations fetch and rank alerts; [`AlertCache`] keeps the last good list
//! - [`Compositor`] turns alerts and a ticker offset into a frame on any [`Canvas`]
//! - [`FrameSink`] implementations consume frames; [`FfmpegSink`] pipes them to `ffmpeg`
//! - [`Scheduler`] ties them together at a fixed frame rate and recovers from failures
#![forbid(unsafe_code)]

mod foundation;

/// Stream configuration.
pub mod config;
/// Encoder sinks.
pub mod encode;
/// Alert feed, policies and sources.
pub mod feed;
/// Frame production.
pub mod render;
/// The stream loop.
pub mod session;

pub use crate::foundation::core::{Fps, FrameIndex, FrameSize, Point, Rect, Rgba8};
pub use crate::foundation::error::{AlertcastError, AlertcastResult};

pub use crate::config::{StreamConfig, StreamKey};
pub use crate::encode::ffmpeg::{FfmpegSink, FfmpegSinkOpts, StreamDestination};
pub use crate::encode::sink::{FrameSink, InMemorySink, SinkState};
pub use crate::feed::alert::{Alert, Severity, SeverityTier};
pub use crate::feed::cache::AlertCache;
pub use crate::feed::parse::parse_feed;
pub use crate::feed::policy::{FilterPolicy, PriorityTable, SeverityPolicy, SeverityTierFilter};
pub use crate::feed::snapshot::{AuxProvider, ImageFileProvider};
pub use crate::feed::source::{AlertSource, FileSource, HttpSource, HttpSourceOpts, StaticSource};
pub use crate::render::canvas::{Canvas, FontWeight, RecordingCanvas, TextStyle};
pub use crate::render::compositor::{Compositor, FramePlan, RenderedFrame};
pub use crate::render::cpu::{CpuCanvas, FontBook};
pub use crate::render::frame::{AuxImage, FrameRGBA};
pub use crate::render::layout::LayoutPolicy;
pub use crate::render::ticker::TickerState;
pub use crate::session::refresh::RefreshMode;
pub use crate::session::scheduler::{
    Scheduler, SchedulerOpts, StopHandle, StreamStats, TickOutcome, TickReport,
};
