use std::path::PathBuf;

use anyhow::Context as _;

use crate::foundation::error::AlertcastResult;
use crate::render::frame::AuxImage;

/// Optional data provider refreshed alongside the alert list (for example a map snapshot).
///
/// Errors keep the previously provided image on screen.
pub trait AuxProvider: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Produce the current image, or `None` to clear it.
    fn refresh(&mut self) -> AlertcastResult<Option<AuxImage>>;
}

/// Re-reads an image file from disk on every refresh.
///
/// Some external process is expected to keep the file up to date.
pub struct ImageFileProvider {
    path: PathBuf,
    name: String,
}

impl ImageFileProvider {
    /// Provider for the image at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("image-file {}", path.display());
        Self { path, name }
    }
}

impl AuxProvider for ImageFileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn refresh(&mut self) -> AlertcastResult<Option<AuxImage>> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read aux image '{}'", self.path.display()))?;
        AuxImage::decode(&bytes).map(Some)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/feed/snapshot.rs"]
mod tests;
