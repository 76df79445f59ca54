//! The stream loop: refresh cadence, frame cadence and sink recovery.

/// Frame pacing and sink restart backoff.
pub mod pacing;
/// Alert refresh, inline or on a worker thread.
pub mod refresh;
/// The orchestrating loop.
pub mod scheduler;
