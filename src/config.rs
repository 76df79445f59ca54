//! Stream configuration: defaults, JSON file, validation and component builders.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::encode::ffmpeg::{DEFAULT_INGEST_URL, FfmpegSinkOpts, StreamDestination};
use crate::feed::policy::FilterPolicy;
use crate::feed::snapshot::{AuxProvider, ImageFileProvider};
use crate::feed::source::{AlertSource, DEFAULT_FEED_URL, FileSource, HttpSource, HttpSourceOpts};
use crate::foundation::core::{Fps, FrameSize};
use crate::foundation::error::{AlertcastError, AlertcastResult};
use crate::render::compositor::Compositor;
use crate::render::cpu::{CpuCanvas, DEFAULT_BOLD_FONT, DEFAULT_REGULAR_FONT, FontBook};
use crate::render::layout::LayoutPolicy;
use crate::session::refresh::RefreshMode;
use crate::session::scheduler::SchedulerOpts;

/// Stream key that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    /// Wrap a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The secret itself.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamKey(<redacted>)")
    }
}

/// Every knob of a stream session.
///
/// Missing fields in a JSON file take their defaults; unknown fields are rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    /// Seconds between successful alert refreshes.
    pub refresh_secs: u64,
    /// Ticker pixels per frame.
    pub scroll_step: u32,
    pub fetch_timeout_secs: u64,
    pub feed_url: String,
    /// Read alerts from a saved feed document instead of `feed_url`.
    pub feed_file: Option<PathBuf>,
    pub user_agent: String,
    pub filter: FilterPolicy,
    pub refresh_mode: RefreshMode,
    /// Side panel entry cap.
    pub panel_cap: usize,
    pub title: String,
    pub font_regular: PathBuf,
    pub font_bold: Option<PathBuf>,
    pub ingest_url: String,
    pub stream_key: Option<StreamKey>,
    /// Encoder executable name or path.
    pub encoder: String,
    pub preset: String,
    pub restart_initial_ms: u64,
    pub restart_max_ms: u64,
    /// Seconds of accepted frames after which a restarted encoder's failures are forgiven.
    pub restart_healthy_secs: u64,
    /// A frame write blocked this long marks the encoder as stalled.
    pub write_timeout_ms: u64,
    /// PNG/JPEG snapshot re-read on every refresh and drawn in the aux zone.
    pub aux_image: Option<PathBuf>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: Fps { num: 5, den: 1 },
            refresh_secs: 30,
            scroll_step: 5,
            fetch_timeout_secs: 8,
            feed_url: DEFAULT_FEED_URL.to_string(),
            feed_file: None,
            user_agent: format!("alertcast/{}", env!("CARGO_PKG_VERSION")),
            filter: FilterPolicy::default(),
            refresh_mode: RefreshMode::default(),
            panel_cap: 6,
            title: "Severe Weather Alerts".to_string(),
            font_regular: PathBuf::from(DEFAULT_REGULAR_FONT),
            font_bold: Some(PathBuf::from(DEFAULT_BOLD_FONT)),
            ingest_url: DEFAULT_INGEST_URL.to_string(),
            stream_key: None,
            encoder: "ffmpeg".to_string(),
            preset: "veryfast".to_string(),
            restart_initial_ms: 500,
            restart_max_ms: 30_000,
            restart_healthy_secs: 10,
            write_timeout_ms: 2000,
            aux_image: None,
        }
    }
}

impl StreamConfig {
    /// Load a JSON config file on top of the defaults.
    pub fn from_json_file(path: &Path) -> AlertcastResult<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read config '{}'", path.display()))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AlertcastError::config(format!("invalid config '{}': {e}", path.display()))
        })
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> AlertcastResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(AlertcastError::config("frame width/height must be non-zero"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(AlertcastError::config(format!(
                "frame size must be even, got {}x{}",
                self.width, self.height
            )));
        }
        Fps::new(self.fps.num, self.fps.den)
            .map_err(|e| AlertcastError::config(format!("invalid fps: {e}")))?;
        if self.refresh_secs == 0 {
            return Err(AlertcastError::config("refresh interval must be > 0"));
        }
        if self.scroll_step == 0 {
            return Err(AlertcastError::config("scroll step must be > 0"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(AlertcastError::config("fetch timeout must be > 0"));
        }
        if self.panel_cap == 0 {
            return Err(AlertcastError::config("panel cap must be > 0"));
        }
        if self.restart_initial_ms == 0 || self.restart_max_ms < self.restart_initial_ms {
            return Err(AlertcastError::config(
                "restart backoff must satisfy 0 < initial <= max",
            ));
        }
        if self.restart_healthy_secs == 0 {
            return Err(AlertcastError::config("restart healthy window must be > 0"));
        }
        if self.write_timeout_ms == 0 {
            return Err(AlertcastError::config("encoder write timeout must be > 0"));
        }
        self.layout().validate()
    }

    /// Frame dimensions.
    pub fn frame_size(&self) -> FrameSize {
        FrameSize {
            width: self.width,
            height: self.height,
        }
    }

    /// Default layout for the configured size, title and panel cap.
    pub fn layout(&self) -> LayoutPolicy {
        LayoutPolicy::for_size(self.frame_size(), self.title.clone(), self.panel_cap)
    }

    /// Compositor over [`StreamConfig::layout`].
    pub fn compositor(&self) -> AlertcastResult<Compositor> {
        Compositor::new(self.layout())
    }

    /// Loop timing and recovery settings.
    pub fn scheduler_opts(&self) -> SchedulerOpts {
        SchedulerOpts {
            fps: self.fps,
            refresh_interval: Duration::from_secs(self.refresh_secs),
            scroll_step: self.scroll_step,
            refresh_mode: self.refresh_mode,
            restart_initial_backoff: Duration::from_millis(self.restart_initial_ms),
            restart_max_backoff: Duration::from_millis(self.restart_max_ms),
            restart_healthy_after: Duration::from_secs(self.restart_healthy_secs),
        }
    }

    /// Alert source: the feed file when set, otherwise HTTP.
    pub fn alert_source(&self) -> AlertcastResult<Box<dyn AlertSource>> {
        let policy = self.filter.build();
        tracing::info!(policy = policy.name(), "severity filter selected");
        if let Some(path) = &self.feed_file {
            return Ok(Box::new(FileSource::new(path.clone(), policy)));
        }
        let opts = HttpSourceOpts {
            url: self.feed_url.clone(),
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            user_agent: self.user_agent.clone(),
        };
        Ok(Box::new(HttpSource::new(opts, policy)?))
    }

    /// Aux provider, if an aux image path is configured.
    pub fn aux_provider(&self) -> Option<Box<dyn AuxProvider>> {
        self.aux_image
            .as_ref()
            .map(|p| Box::new(ImageFileProvider::new(p.clone())) as Box<dyn AuxProvider>)
    }

    /// Publish destination. A missing stream key is a configuration error.
    pub fn destination(&self) -> AlertcastResult<StreamDestination> {
        let key = self.stream_key.as_ref().ok_or_else(|| {
            AlertcastError::config(
                "stream key is required: set ALERTCAST_STREAM_KEY or pass --stream-key",
            )
        })?;
        StreamDestination::new(self.ingest_url.clone(), key.expose())
    }

    /// Encoder options for the configured geometry and destination.
    pub fn sink_opts(&self) -> AlertcastResult<FfmpegSinkOpts> {
        let mut opts = FfmpegSinkOpts::new(self.frame_size(), self.fps, self.destination()?);
        opts.binary = self.encoder.clone();
        opts.preset = self.preset.clone();
        opts.write_timeout = Duration::from_millis(self.write_timeout_ms);
        opts.validate()?;
        Ok(opts)
    }

    /// Load fonts and build the raster canvas.
    pub fn cpu_canvas(&self) -> AlertcastResult<CpuCanvas> {
        let fonts = FontBook::load(&self.font_regular, self.font_bold.as_deref())?;
        CpuCanvas::new(self.frame_size(), fonts)
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
