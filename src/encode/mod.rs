//! Encoder sinks.
//!
//! Sinks consume rendered frames in production order. Restart policy lives in the scheduler; a
//! sink only reports that it failed.

/// `ffmpeg`-based sink streaming to a network destination.
pub mod ffmpeg;
/// Sink contract, lifecycle states and the in-memory sink.
pub mod sink;
