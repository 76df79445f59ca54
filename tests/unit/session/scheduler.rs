use std::collections::VecDeque;
use std::sync::Mutex;

use super::*;
use crate::feed::alert::Alert;
use crate::feed::source::StaticSource;
use crate::foundation::core::{FrameSize, Point, Rect, Rgba8};
use crate::render::canvas::{RecordingCanvas, TextStyle};
use crate::render::frame::FrameRGBA;
use crate::render::layout::LayoutPolicy;

const W: u32 = 640;
const H: u32 = 360;
const MS: Duration = Duration::from_millis(1);

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Start,
    StartFailed,
    Write(u64),
    WriteFailed(u64),
    WriteRejected(u64),
    Stop,
}

/// Sink driven by a script: which write calls and start calls fail.
struct ScriptedSink {
    log: Arc<Mutex<Vec<Event>>>,
    state: SinkState,
    writes: usize,
    fail_writes: Vec<usize>,
    fail_every_write: bool,
    /// Write calls refused while the sink keeps running.
    reject_writes: Vec<usize>,
    starts: usize,
    fail_starts: usize,
}

impl ScriptedSink {
    fn new(log: Arc<Mutex<Vec<Event>>>) -> Self {
        Self {
            log,
            state: SinkState::Stopped,
            writes: 0,
            fail_writes: Vec::new(),
            fail_every_write: false,
            reject_writes: Vec::new(),
            starts: 0,
            fail_starts: 0,
        }
    }
}

impl FrameSink for ScriptedSink {
    fn start(&mut self) -> AlertcastResult<()> {
        self.starts += 1;
        if self.starts <= self.fail_starts {
            self.state = SinkState::Failed;
            self.log.lock().unwrap().push(Event::StartFailed);
            return Err(AlertcastError::encode("scripted start failure"));
        }
        self.state = SinkState::Running;
        self.log.lock().unwrap().push(Event::Start);
        Ok(())
    }

    fn write(&mut self, idx: FrameIndex, _frame: &FrameRGBA) -> AlertcastResult<()> {
        assert_eq!(self.state, SinkState::Running, "write on a sink that is not running");
        self.writes += 1;
        if self.reject_writes.contains(&self.writes) {
            self.log.lock().unwrap().push(Event::WriteRejected(idx.0));
            return Err(AlertcastError::encode("scripted queue full"));
        }
        if self.fail_every_write || self.fail_writes.contains(&self.writes) {
            self.state = SinkState::Failed;
            self.log.lock().unwrap().push(Event::WriteFailed(idx.0));
            return Err(AlertcastError::encode("scripted write failure"));
        }
        self.log.lock().unwrap().push(Event::Write(idx.0));
        Ok(())
    }

    fn stop(&mut self) -> AlertcastResult<()> {
        self.state = SinkState::Stopped;
        self.log.lock().unwrap().push(Event::Stop);
        Ok(())
    }

    fn state(&self) -> SinkState {
        self.state
    }
}

/// Source returning scripted outcomes, repeating the last one.
struct ScriptedSource {
    script: VecDeque<Result<Vec<Alert>, String>>,
    calls: Arc<Mutex<usize>>,
}

impl AlertSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_owned()
    }

    fn fetch(&mut self) -> AlertcastResult<Vec<Alert>> {
        *self.calls.lock().unwrap() += 1;
        let next = if self.script.len() > 1 {
            self.script.pop_front()
        } else {
            self.script.front().cloned()
        };
        match next {
            Some(Ok(v)) => Ok(v),
            Some(Err(m)) => Err(AlertcastError::fetch(m)),
            None => Ok(Vec::new()),
        }
    }
}

/// Canvas that fails or panics on `finish` while `mode` says so.
struct FlakyCanvas {
    inner: RecordingCanvas,
    mode: Arc<Mutex<Flaky>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flaky {
    Ok,
    Error,
    Panic,
}

impl Canvas for FlakyCanvas {
    fn size(&self) -> FrameSize {
        self.inner.size()
    }

    fn clear(&mut self, color: Rgba8) -> AlertcastResult<()> {
        self.inner.clear(color)
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba8) -> AlertcastResult<()> {
        self.inner.fill_rect(rect, color)
    }

    fn measure_text(&mut self, text: &str, style: &TextStyle) -> AlertcastResult<f32> {
        self.inner.measure_text(text, style)
    }

    fn draw_text(&mut self, origin: Point, text: &str, style: &TextStyle) -> AlertcastResult<()> {
        self.inner.draw_text(origin, text, style)
    }

    fn draw_image(&mut self, dest: Rect, image: &AuxImage) -> AlertcastResult<()> {
        self.inner.draw_image(dest, image)
    }

    fn finish(&mut self) -> AlertcastResult<FrameRGBA> {
        let mode = *self.mode.lock().unwrap();
        match mode {
            Flaky::Ok => self.inner.finish(),
            Flaky::Error => Err(AlertcastError::render("scripted render failure")),
            Flaky::Panic => panic!("scripted render panic"),
        }
    }
}

fn compositor() -> Compositor {
    Compositor::new(LayoutPolicy::for_size(
        FrameSize {
            width: W,
            height: H,
        },
        "Test",
        6,
    ))
    .unwrap()
}

fn opts(mode: RefreshMode) -> SchedulerOpts {
    let mut o = SchedulerOpts::new(Fps::new(5, 1).unwrap());
    o.refresh_mode = mode;
    o
}

fn scheduler(
    sink: Box<dyn FrameSink>,
    source: Box<dyn AlertSource>,
    canvas: Box<dyn Canvas>,
) -> Scheduler {
    Scheduler::new(opts(RefreshMode::Inline), compositor(), canvas, sink, source, None).unwrap()
}

fn recording() -> Box<dyn Canvas> {
    Box::new(RecordingCanvas::new(W, H))
}

fn tornado() -> Vec<Alert> {
    vec![Alert::ranked("Tornado Warning", "X County", 100)]
}

#[test]
fn first_tick_refreshes_renders_and_writes_frame_zero() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut s = scheduler(
        Box::new(ScriptedSink::new(log.clone())),
        Box::new(StaticSource::ok(tornado())),
        recording(),
    );
    let r = s.tick(Instant::now());
    assert_eq!(r.frame, FrameIndex(0));
    assert_eq!(r.outcome, TickOutcome::Written);
    assert_eq!(r.refreshed, Some(true));
    assert_eq!(s.cache().read(), tornado().as_slice());
    assert_eq!(*log.lock().unwrap(), vec![Event::Start, Event::Write(0)]);

    let st = s.stats();
    assert_eq!(st.ticks, 1);
    assert_eq!(st.frames_written, 1);
    assert_eq!(st.refresh_ok, 1);
    assert_eq!(st.sink_restarts, 0);
}

#[test]
fn refresh_runs_only_when_stale() {
    let calls = Arc::new(Mutex::new(0));
    let src = ScriptedSource {
        script: VecDeque::from([Ok(tornado())]),
        calls: calls.clone(),
    };
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut s = scheduler(Box::new(ScriptedSink::new(log)), Box::new(src), recording());
    let t0 = Instant::now();
    s.tick(t0);
    s.tick(t0 + 200 * MS);
    s.tick(t0 + 29_999 * MS);
    assert_eq!(*calls.lock().unwrap(), 1);
    let r = s.tick(t0 + 30_000 * MS);
    assert_eq!(r.refreshed, Some(true));
    assert_eq!(*calls.lock().unwrap(), 2);
}

#[test]
fn failed_refresh_keeps_previous_alerts_and_retries_next_tick() {
    let calls = Arc::new(Mutex::new(0));
    let src = ScriptedSource {
        script: VecDeque::from([Ok(tornado()), Err("down".to_owned())]),
        calls: calls.clone(),
    };
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut s = scheduler(Box::new(ScriptedSink::new(log)), Box::new(src), recording());
    let t0 = Instant::now();
    s.tick(t0);
    let fetched = s.cache().fetched_at();

    let r = s.tick(t0 + 31_000 * MS);
    assert_eq!(r.refreshed, Some(false));
    assert_eq!(r.outcome, TickOutcome::Written);
    assert_eq!(s.cache().read(), tornado().as_slice());
    assert_eq!(s.cache().fetched_at(), fetched);

    // Still stale: the next tick tries again.
    let r = s.tick(t0 + 31_200 * MS);
    assert_eq!(r.refreshed, Some(false));
    assert_eq!(*calls.lock().unwrap(), 3);
    assert_eq!(s.stats().refresh_failed, 2);
}

#[test]
fn write_failure_restarts_sink_before_next_write() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sink = ScriptedSink::new(log.clone());
    sink.fail_writes = vec![3];
    let mut s = scheduler(Box::new(sink), Box::new(StaticSource::ok(tornado())), recording());
    let t0 = Instant::now();
    for i in 0..5u32 {
        s.tick(t0 + 200 * MS * i);
    }
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            Event::Start,
            Event::Write(0),
            Event::Write(1),
            Event::WriteFailed(2),
            Event::Start,
            Event::Write(3),
            Event::Write(4),
        ]
    );
    let st = s.stats();
    assert_eq!(st.frames_written, 4);
    assert_eq!(st.frames_dropped, 1);
    assert_eq!(st.sink_restarts, 1);
}

#[test]
fn rejected_write_drops_frame_without_restart() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sink = ScriptedSink::new(log.clone());
    sink.reject_writes = vec![2];
    let mut s = scheduler(Box::new(sink), Box::new(StaticSource::ok(tornado())), recording());
    let t0 = Instant::now();
    for i in 0..4u32 {
        s.tick(t0 + 200 * MS * i);
    }
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            Event::Start,
            Event::Write(0),
            Event::WriteRejected(1),
            Event::Write(2),
            Event::Write(3),
        ]
    );
    let st = s.stats();
    assert_eq!(st.frames_dropped, 1);
    assert_eq!(st.sink_restarts, 0);
    assert_eq!(s.sink_state(), SinkState::Running);
}

#[test]
fn sink_that_dies_on_every_write_is_restarted_with_backoff() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sink = ScriptedSink::new(log.clone());
    sink.fail_every_write = true;
    let mut s = scheduler(Box::new(sink), Box::new(StaticSource::ok(tornado())), recording());
    let t0 = Instant::now();
    // Restarts at t0 (immediate), t0+1200ms and t0+3200ms; the next would be t0+7200ms.
    for i in 0..25u32 {
        s.tick(t0 + 200 * MS * i);
    }
    let st = s.stats();
    assert_eq!(st.sink_restarts, 3);
    assert_eq!(st.frames_written, 0);
    assert_eq!(st.frames_dropped, 25);
    let starts = log
        .lock()
        .unwrap()
        .iter()
        .filter(|e| **e == Event::Start)
        .count();
    assert_eq!(starts, 4);
}

#[test]
fn healthy_sink_restarts_immediately_after_a_later_crash() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sink = ScriptedSink::new(log.clone());
    // Second write fails, then the sink runs well past the 10s health window before failing again.
    sink.fail_writes = vec![2, 60];
    let mut s = scheduler(Box::new(sink), Box::new(StaticSource::ok(tornado())), recording());
    let t0 = Instant::now();
    for i in 0..70u32 {
        s.tick(t0 + 200 * MS * i);
    }
    let st = s.stats();
    assert_eq!(st.sink_restarts, 2);
    assert_eq!(st.frames_dropped, 2);
    assert_eq!(st.frames_written, 68);
}

#[test]
fn write_failure_after_stop_request_does_not_restart() {
    struct FailAndStopSink {
        inner: ScriptedSink,
        stop: StopHandle,
    }
    impl FrameSink for FailAndStopSink {
        fn start(&mut self) -> AlertcastResult<()> {
            self.inner.start()
        }
        fn write(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> AlertcastResult<()> {
            self.stop.request_stop();
            self.inner.write(idx, frame)
        }
        fn stop(&mut self) -> AlertcastResult<()> {
            self.inner.stop()
        }
        fn state(&self) -> SinkState {
            self.inner.state()
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let stop = StopHandle::new();
    let mut inner = ScriptedSink::new(log.clone());
    inner.fail_every_write = true;
    let sink = FailAndStopSink {
        inner,
        stop: stop.clone(),
    };
    let mut s = Scheduler::new(
        opts(RefreshMode::Inline),
        compositor(),
        recording(),
        Box::new(sink),
        Box::new(StaticSource::ok(tornado())),
        None,
    )
    .unwrap()
    .with_stop_handle(stop);

    let stats = s.run();
    assert_eq!(stats.sink_restarts, 0);
    assert_eq!(
        *log.lock().unwrap(),
        vec![Event::Start, Event::WriteFailed(0), Event::Stop]
    );
}

#[test]
fn failed_starts_back_off_and_drop_frames() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sink = ScriptedSink::new(log.clone());
    sink.fail_starts = 2;
    let mut s = scheduler(Box::new(sink), Box::new(StaticSource::ok(tornado())), recording());
    let t0 = Instant::now();

    // Start fails at t0; next attempt allowed at t0+500ms.
    assert_eq!(s.tick(t0).outcome, TickOutcome::Dropped);
    assert_eq!(s.tick(t0 + 200 * MS).outcome, TickOutcome::Dropped);
    // Second failure at t0+600ms; next attempt at t0+1600ms.
    assert_eq!(s.tick(t0 + 600 * MS).outcome, TickOutcome::Dropped);
    assert_eq!(s.tick(t0 + 1400 * MS).outcome, TickOutcome::Dropped);
    assert_eq!(s.tick(t0 + 1600 * MS).outcome, TickOutcome::Written);

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            Event::StartFailed,
            Event::StartFailed,
            Event::Start,
            Event::Write(4),
        ]
    );
    let st = s.stats();
    assert_eq!(st.frames_dropped, 4);
    assert_eq!(st.sink_start_failures, 2);
    assert_eq!(st.sink_restarts, 1);
}

#[test]
fn ticker_advances_only_on_rendered_frames() {
    let mode = Arc::new(Mutex::new(Flaky::Ok));
    let canvas = FlakyCanvas {
        inner: RecordingCanvas::new(W, H),
        mode: mode.clone(),
    };
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut s = scheduler(
        Box::new(ScriptedSink::new(log.clone())),
        Box::new(StaticSource::ok(tornado())),
        Box::new(canvas),
    );
    let t0 = Instant::now();
    assert_eq!(s.ticker().current_offset(), i64::from(W));
    s.tick(t0);
    assert_eq!(s.ticker().current_offset(), i64::from(W) - 5);

    *mode.lock().unwrap() = Flaky::Error;
    let r = s.tick(t0 + 200 * MS);
    assert_eq!(r.outcome, TickOutcome::RenderFailed);
    assert_eq!(s.ticker().current_offset(), i64::from(W) - 5);

    *mode.lock().unwrap() = Flaky::Panic;
    let r = s.tick(t0 + 400 * MS);
    assert_eq!(r.outcome, TickOutcome::RenderFailed);
    assert_eq!(s.ticker().current_offset(), i64::from(W) - 5);

    *mode.lock().unwrap() = Flaky::Ok;
    let r = s.tick(t0 + 600 * MS);
    assert_eq!(r.outcome, TickOutcome::Written);
    assert_eq!(s.ticker().current_offset(), i64::from(W) - 10);

    // Frame indices skip the failed ticks but stay increasing.
    assert_eq!(
        *log.lock().unwrap(),
        vec![Event::Start, Event::Write(0), Event::Write(3)]
    );
    assert_eq!(s.stats().render_failures, 2);
}

#[test]
fn ticker_wraps_after_crawl_leaves_frame() {
    let mut s = scheduler(
        Box::new(ScriptedSink::new(Arc::new(Mutex::new(Vec::new())))),
        Box::new(StaticSource::ok(tornado())),
        recording(),
    );
    // "Tornado Warning - X County" is 26 chars at 22px * 0.5 = 286px.
    let t0 = Instant::now();
    s.tick(t0);
    assert_eq!(s.ticker().text_width(), 286);
    let mut offsets = Vec::new();
    for i in 1..400u32 {
        s.tick(t0 + 200 * MS * i);
        offsets.push(s.ticker().current_offset());
    }
    assert!(offsets.iter().all(|&o| o >= -286 && o <= i64::from(W)));
    assert!(offsets.contains(&i64::from(W)));
}

#[cfg(unix)]
#[test]
fn signal_requests_stop_without_exiting() {
    let stop = StopHandle::new();
    stop.stop_on_signals(&[signal_hook::consts::SIGUSR2]).unwrap();
    assert!(!stop.is_stop_requested());
    // Only one delivery: a second one would exit the test process.
    signal_hook::low_level::raise(signal_hook::consts::SIGUSR2).unwrap();
    let t0 = Instant::now();
    while !stop.is_stop_requested() && t0.elapsed() < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(stop.is_stop_requested());
}

#[test]
fn stop_before_write_skips_the_write() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut s = scheduler(
        Box::new(ScriptedSink::new(log.clone())),
        Box::new(StaticSource::ok(tornado())),
        recording(),
    );
    s.stop_handle().request_stop();
    let r = s.tick(Instant::now());
    assert_eq!(r.outcome, TickOutcome::Stopped);
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn run_returns_after_external_stop_and_stops_sink() {
    struct StoppingSink {
        inner: ScriptedSink,
        stop: StopHandle,
    }
    impl FrameSink for StoppingSink {
        fn start(&mut self) -> AlertcastResult<()> {
            self.inner.start()
        }
        fn write(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> AlertcastResult<()> {
            self.inner.write(idx, frame)?;
            if idx.0 == 2 {
                self.stop.request_stop();
            }
            Ok(())
        }
        fn stop(&mut self) -> AlertcastResult<()> {
            self.inner.stop()
        }
        fn state(&self) -> SinkState {
            self.inner.state()
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let stop = StopHandle::new();
    let sink = StoppingSink {
        inner: ScriptedSink::new(log.clone()),
        stop: stop.clone(),
    };
    let mut o = opts(RefreshMode::Inline);
    o.fps = Fps::new(200, 1).unwrap();
    let mut s = Scheduler::new(
        o,
        compositor(),
        recording(),
        Box::new(sink),
        Box::new(StaticSource::ok(tornado())),
        None,
    )
    .unwrap()
    .with_stop_handle(stop);

    let stats = s.run();
    assert_eq!(stats.frames_written, 3);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            Event::Start,
            Event::Write(0),
            Event::Write(1),
            Event::Write(2),
            Event::Stop,
        ]
    );
    assert_eq!(s.sink_state(), SinkState::Stopped);
}

#[test]
fn background_refresh_does_not_block_ticks() {
    struct GatedSource {
        gate: Arc<Mutex<bool>>,
    }
    impl AlertSource for GatedSource {
        fn describe(&self) -> String {
            "gated".to_owned()
        }
        fn fetch(&mut self) -> AlertcastResult<Vec<Alert>> {
            while !*self.gate.lock().unwrap() {
                std::thread::sleep(Duration::from_millis(2));
            }
            Ok(tornado())
        }
    }

    let gate = Arc::new(Mutex::new(false));
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut s = Scheduler::new(
        opts(RefreshMode::Background),
        compositor(),
        recording(),
        Box::new(ScriptedSink::new(log)),
        Box::new(GatedSource { gate: gate.clone() }),
        None,
    )
    .unwrap();

    let t0 = Instant::now();
    for i in 0..5u32 {
        let r = s.tick(t0 + 200 * MS * i);
        assert_eq!(r.outcome, TickOutcome::Written);
        assert_eq!(r.refreshed, None);
    }
    assert!(s.cache().read().is_empty());

    *gate.lock().unwrap() = true;
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut i = 5u32;
    loop {
        let r = s.tick(t0 + 200 * MS * i);
        i += 1;
        if r.refreshed == Some(true) {
            break;
        }
        assert!(Instant::now() < deadline, "background refresh never landed");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(s.cache().read(), tornado().as_slice());
}

#[test]
fn aux_provider_result_is_kept_across_failures() {
    struct FlakyAux {
        calls: usize,
    }
    impl AuxProvider for FlakyAux {
        fn name(&self) -> &str {
            "flaky"
        }
        fn refresh(&mut self) -> AlertcastResult<Option<AuxImage>> {
            self.calls += 1;
            if self.calls == 1 {
                Ok(Some(AuxImage::from_premul(2, 2, vec![255; 16])?))
            } else {
                Err(AlertcastError::fetch("radar down"))
            }
        }
    }

    let mut s = Scheduler::new(
        opts(RefreshMode::Inline),
        compositor(),
        recording(),
        Box::new(ScriptedSink::new(Arc::new(Mutex::new(Vec::new())))),
        Box::new(StaticSource::ok(tornado())),
        Some(Box::new(FlakyAux { calls: 0 })),
    )
    .unwrap();
    let t0 = Instant::now();
    s.tick(t0);
    assert!(s.aux_image().is_some());
    s.tick(t0 + 31_000 * MS);
    assert!(s.aux_image().is_some());
}

#[test]
fn new_rejects_mismatched_canvas_and_zero_step() {
    let mk = |o: SchedulerOpts, canvas: Box<dyn Canvas>| {
        Scheduler::new(
            o,
            compositor(),
            canvas,
            Box::new(ScriptedSink::new(Arc::new(Mutex::new(Vec::new())))),
            Box::new(StaticSource::ok(Vec::new())),
            None,
        )
    };
    assert!(mk(opts(RefreshMode::Inline), Box::new(RecordingCanvas::new(320, 240))).is_err());
    let mut o = opts(RefreshMode::Inline);
    o.scroll_step = 0;
    assert!(mk(o, recording()).is_err());
}
