use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::encode::sink::{FrameSink, SinkState};
use crate::feed::cache::AlertCache;
use crate::feed::snapshot::AuxProvider;
use crate::feed::source::AlertSource;
use crate::foundation::core::{FrameIndex, Fps};
use crate::foundation::error::{AlertcastError, AlertcastResult};
use crate::render::canvas::Canvas;
use crate::render::compositor::{Compositor, RenderedFrame};
use crate::render::frame::AuxImage;
use crate::render::ticker::TickerState;
use crate::session::pacing::{FramePacer, RestartBackoff};
use crate::session::refresh::{
    RefreshMode, RefreshOutcome, Refresher, aux_mut, panic_message, refresh_once,
};

/// Loop timing and recovery settings.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerOpts {
    /// Frame rate.
    pub fps: Fps,
    /// Minimum time between successful alert refreshes.
    pub refresh_interval: Duration,
    /// Ticker pixels per frame.
    pub scroll_step: u32,
    /// Inline or background refresh.
    pub refresh_mode: RefreshMode,
    /// First wait after a failed sink start.
    pub restart_initial_backoff: Duration,
    /// Cap on the wait between sink start attempts.
    pub restart_max_backoff: Duration,
    /// How long a restarted sink must keep accepting frames before its failures are forgiven.
    pub restart_healthy_after: Duration,
}

impl SchedulerOpts {
    /// Options for `fps` with the remaining fields at their defaults.
    pub fn new(fps: Fps) -> Self {
        Self {
            fps,
            refresh_interval: Duration::from_secs(30),
            scroll_step: 5,
            refresh_mode: RefreshMode::default(),
            restart_initial_backoff: Duration::from_millis(500),
            restart_max_backoff: Duration::from_secs(30),
            restart_healthy_after: Duration::from_secs(10),
        }
    }
}

/// Counters for one stream session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    /// Loop iterations, including ones that produced no frame.
    pub ticks: u64,
    /// Frames accepted by the sink.
    pub frames_written: u64,
    /// Rendered frames the sink did not take.
    pub frames_dropped: u64,
    /// Ticks whose render failed or panicked.
    pub render_failures: u64,
    /// Successful sink starts after a failure.
    pub sink_restarts: u64,
    /// Failed sink starts.
    pub sink_start_failures: u64,
    /// Refreshes that replaced the cache.
    pub refresh_ok: u64,
    /// Refreshes that failed; the cache kept its previous list.
    pub refresh_failed: u64,
}

/// What happened to the frame of one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The sink accepted the frame.
    Written,
    /// The frame was rendered but the sink was unavailable or its write failed.
    Dropped,
    /// Rendering failed; nothing was written and the ticker did not move.
    RenderFailed,
    /// Stop was requested before the write.
    Stopped,
}

/// Result of [`Scheduler::tick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickReport {
    /// Index assigned to this tick's frame.
    pub frame: FrameIndex,
    /// Frame fate.
    pub outcome: TickOutcome,
    /// `Some(ok)` when a refresh result was applied during this tick.
    pub refreshed: Option<bool>,
}

/// Cooperative cancellation flag shared with signal handlers.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to finish after the current tick.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Underlying flag, for `signal_hook::flag::register`.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    /// Request stop on each of `signals`. A repeat delivery after stop was requested exits the
    /// process with status 1, so a hung shutdown can still be interrupted.
    pub fn stop_on_signals(&self, signals: &[std::ffi::c_int]) -> AlertcastResult<()> {
        for &sig in signals {
            // The shutdown check must run before the flag is set by the same delivery.
            signal_hook::flag::register_conditional_shutdown(sig, 1, self.flag())
                .and_then(|_| signal_hook::flag::register(sig, self.flag()))
                .map_err(|e| {
                    AlertcastError::Other(
                        anyhow::Error::new(e).context(format!("install handler for signal {sig}")),
                    )
                })?;
        }
        Ok(())
    }
}

/// Owns every piece of the stream and drives it tick by tick.
///
/// One tick: refresh alerts if stale, render the frame, advance the ticker, write the frame and
/// recover the sink if it failed. Failures in any step are logged and counted; the loop itself
/// only ends when stop is requested.
pub struct Scheduler {
    opts: SchedulerOpts,
    cache: AlertCache,
    ticker: TickerState,
    compositor: Compositor,
    canvas: Box<dyn Canvas>,
    sink: Box<dyn FrameSink>,
    refresher: Refresher,
    aux_image: Option<AuxImage>,
    next_frame: FrameIndex,
    backoff: RestartBackoff,
    stats: StreamStats,
    stop: StopHandle,
}

impl Scheduler {
    /// Assemble a scheduler. Spawns the refresh worker in background mode.
    pub fn new(
        opts: SchedulerOpts,
        compositor: Compositor,
        canvas: Box<dyn Canvas>,
        sink: Box<dyn FrameSink>,
        source: Box<dyn AlertSource>,
        aux: Option<Box<dyn AuxProvider>>,
    ) -> AlertcastResult<Self> {
        if opts.scroll_step == 0 {
            return Err(AlertcastError::validation("scroll step must be > 0"));
        }
        if opts.refresh_interval.is_zero() {
            return Err(AlertcastError::validation("refresh interval must be > 0"));
        }
        let size = compositor.layout().size;
        if canvas.size() != size {
            return Err(AlertcastError::validation(format!(
                "canvas is {}x{} but layout is {}x{}",
                canvas.size().width,
                canvas.size().height,
                size.width,
                size.height
            )));
        }
        tracing::info!(
            source = %source.describe(),
            aux = ?aux.as_ref().map(|a| a.name()),
            mode = ?opts.refresh_mode,
            "scheduler configured"
        );
        let refresher = Refresher::new(opts.refresh_mode, source, aux)?;
        Ok(Self {
            opts,
            cache: AlertCache::new(),
            ticker: TickerState::new(size.width),
            compositor,
            canvas,
            sink,
            refresher,
            aux_image: None,
            next_frame: FrameIndex(0),
            backoff: RestartBackoff::new(
                opts.restart_initial_backoff,
                opts.restart_max_backoff,
                opts.restart_healthy_after,
            ),
            stats: StreamStats::default(),
            stop: StopHandle::new(),
        })
    }

    /// Use an externally owned stop flag.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Clone of the stop flag.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Session counters.
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Alert cache.
    pub fn cache(&self) -> &AlertCache {
        &self.cache
    }

    /// Ticker position.
    pub fn ticker(&self) -> &TickerState {
        &self.ticker
    }

    /// Current sink state.
    pub fn sink_state(&self) -> SinkState {
        self.sink.state()
    }

    /// Latest aux image, if any.
    pub fn aux_image(&self) -> Option<&AuxImage> {
        self.aux_image.as_ref()
    }

    /// Run until stop is requested, then stop the sink and return the counters.
    pub fn run(&mut self) -> StreamStats {
        tracing::info!(fps = self.opts.fps.as_f64(), "stream loop starting");
        self.start_sink(Instant::now(), false);
        let mut pacer = FramePacer::new(self.opts.fps.frame_period(), Instant::now());
        while !self.stop.is_stop_requested() {
            let report = self.tick(Instant::now());
            if report.outcome == TickOutcome::Stopped {
                break;
            }
            let sleep = pacer.next_sleep(Instant::now());
            if !sleep.is_zero() {
                std::thread::sleep(sleep);
            }
        }
        tracing::info!("stop requested; shutting down encoder");
        if let Err(e) = self.sink.stop() {
            tracing::warn!(error = %e, "encoder did not exit cleanly");
        }
        tracing::info!(stats = ?self.stats, "stream loop finished");
        self.stats
    }

    /// Run one loop iteration at time `now`.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        self.stats.ticks += 1;
        let refreshed = self.refresh_step(now);

        let frame = self.next_frame;
        self.next_frame = frame.next();

        let Some(rendered) = self.render_step(frame) else {
            self.stats.render_failures += 1;
            return TickReport {
                frame,
                outcome: TickOutcome::RenderFailed,
                refreshed,
            };
        };

        self.ticker.set_text_width(rendered.crawl_width);
        self.ticker.advance(self.opts.scroll_step);

        if self.stop.is_stop_requested() {
            return TickReport {
                frame,
                outcome: TickOutcome::Stopped,
                refreshed,
            };
        }

        let outcome = self.write_step(frame, &rendered, now);
        TickReport {
            frame,
            outcome,
            refreshed,
        }
    }

    fn refresh_step(&mut self, now: Instant) -> Option<bool> {
        let stale = self.cache.needs_refresh(now, self.opts.refresh_interval);
        let outcome: Option<RefreshOutcome> = match &mut self.refresher {
            Refresher::Inline { source, aux } => {
                stale.then(|| refresh_once(source.as_mut(), aux_mut(aux)))
            }
            Refresher::Background(worker) => {
                let done = worker.poll();
                if done.is_none() && stale && !worker.in_flight() {
                    if let Err(e) = worker.request() {
                        tracing::warn!(error = %e, "could not request alert refresh");
                        self.stats.refresh_failed += 1;
                    }
                }
                done
            }
        };
        outcome.map(|o| self.apply_refresh(o, now))
    }

    fn apply_refresh(&mut self, outcome: RefreshOutcome, now: Instant) -> bool {
        let ok = match outcome.alerts {
            Ok(alerts) => {
                tracing::info!(count = alerts.len(), "alerts refreshed");
                self.cache.update(alerts, now);
                self.stats.refresh_ok += 1;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, kept = self.cache.read().len(), "alert refresh failed");
                self.stats.refresh_failed += 1;
                false
            }
        };
        match outcome.aux {
            Some(Ok(Some(img))) => self.aux_image = Some(img),
            Some(Ok(None)) | None => {}
            Some(Err(e)) => tracing::warn!(error = %e, "aux image refresh failed"),
        }
        ok
    }

    fn render_step(&mut self, frame: FrameIndex) -> Option<RenderedFrame> {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.compositor.render(
                self.canvas.as_mut(),
                self.cache.read(),
                self.ticker.current_offset(),
                self.aux_image.as_ref(),
            )
        }));
        match result {
            Ok(Ok(rendered)) => Some(rendered),
            Ok(Err(e)) => {
                tracing::error!(frame = frame.0, error = %e, "render failed; skipping frame");
                None
            }
            Err(panic) => {
                tracing::error!(
                    frame = frame.0,
                    panic = %panic_message(panic.as_ref()),
                    "render panicked; skipping frame"
                );
                None
            }
        }
    }

    fn write_step(
        &mut self,
        frame: FrameIndex,
        rendered: &RenderedFrame,
        now: Instant,
    ) -> TickOutcome {
        match self.sink.state() {
            SinkState::Running => {}
            SinkState::Stopped => self.start_sink(now, false),
            SinkState::Starting | SinkState::Failed => self.start_sink(now, true),
        }
        if self.sink.state() != SinkState::Running {
            self.stats.frames_dropped += 1;
            return TickOutcome::Dropped;
        }
        match self.sink.write(frame, &rendered.frame) {
            Ok(()) => {
                self.stats.frames_written += 1;
                self.backoff.record_progress(now);
                TickOutcome::Written
            }
            Err(e) if self.sink.state() != SinkState::Failed => {
                tracing::warn!(frame = frame.0, error = %e, "frame dropped by encoder");
                self.stats.frames_dropped += 1;
                TickOutcome::Dropped
            }
            Err(e) => {
                self.stats.frames_dropped += 1;
                let wait = self.backoff.record_crash(now);
                tracing::warn!(
                    frame = frame.0,
                    error = %e,
                    retry_in_ms = wait.as_millis() as u64,
                    "frame write failed; encoder failed"
                );
                if !self.stop.is_stop_requested() {
                    self.start_sink(now, true);
                }
                TickOutcome::Dropped
            }
        }
    }

    fn start_sink(&mut self, now: Instant, restart: bool) {
        if !self.backoff.ready(now) {
            return;
        }
        match self.sink.start() {
            Ok(()) => {
                if restart {
                    self.stats.sink_restarts += 1;
                    tracing::info!(after_failures = self.backoff.failures(), "encoder restarted");
                }
                self.backoff.record_start(now);
            }
            Err(e) => {
                self.stats.sink_start_failures += 1;
                let wait = self.backoff.record_failure(now);
                tracing::error!(
                    error = %e,
                    retry_in_ms = wait.as_millis() as u64,
                    "encoder start failed"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/scheduler.rs"]
mod tests;
