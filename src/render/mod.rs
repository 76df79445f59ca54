//! Frame production: canvas capability, layout zones, compositor and ticker state.

/// Drawing capability and the in-memory recording canvas.
pub mod canvas;
/// Alert list + ticker offset -> frame.
pub mod compositor;
/// `vello_cpu` + `parley` canvas.
pub mod cpu;
/// Frame and image buffers.
pub mod frame;
/// Named layout zones, palette and text sizes.
pub mod layout;
/// Scrolling crawl position.
pub mod ticker;
