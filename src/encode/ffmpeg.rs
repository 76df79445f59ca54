use std::io::{BufRead as _, BufReader, Write as _};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::encode::sink::{FrameSink, SinkState};
use crate::foundation::core::{FrameIndex, FrameSize, Fps};
use crate::foundation::error::{AlertcastError, AlertcastResult};
use crate::foundation::math::mul_div255_u16;
use crate::render::frame::FrameRGBA;

/// Default RTMP ingest.
pub const DEFAULT_INGEST_URL: &str = "rtmp://a.rtmp.youtube.com/live2";

/// Publish destination: ingest URL plus secret stream key.
///
/// `Display` and `Debug` never print the key.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamDestination {
    ingest_url: String,
    stream_key: String,
}

impl StreamDestination {
    /// Destination `ingest_url/stream_key`. Both parts must be non-empty.
    pub fn new(
        ingest_url: impl Into<String>,
        stream_key: impl Into<String>,
    ) -> AlertcastResult<Self> {
        let ingest_url = ingest_url.into().trim_end_matches('/').to_string();
        let stream_key = stream_key.into().trim().to_string();
        if ingest_url.is_empty() {
            return Err(AlertcastError::config("ingest url must be non-empty"));
        }
        if stream_key.is_empty() {
            return Err(AlertcastError::config("stream key must be non-empty"));
        }
        Ok(Self {
            ingest_url,
            stream_key,
        })
    }

    /// Full publish URL, including the key.
    pub fn url(&self) -> String {
        format!("{}/{}", self.ingest_url, self.stream_key)
    }

    /// Ingest URL without the key.
    pub fn ingest_url(&self) -> &str {
        &self.ingest_url
    }
}

impl std::fmt::Display for StreamDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/<redacted>", self.ingest_url)
    }
}

impl std::fmt::Debug for StreamDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDestination")
            .field("ingest_url", &self.ingest_url)
            .field("stream_key", &"<redacted>")
            .finish()
    }
}

/// Options for [`FfmpegSink`].
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    /// Encoder executable.
    pub binary: String,
    /// Raw input frame size.
    pub size: FrameSize,
    /// Raw input frame rate.
    pub fps: Fps,
    /// Where the encoded stream is published.
    pub destination: StreamDestination,
    /// x264 preset.
    pub preset: String,
    /// Keyframe interval in seconds.
    pub keyframe_secs: u32,
    /// Background color used to flatten alpha (RGBA8, straight alpha).
    pub bg_rgba: [u8; 4],
    /// How long `stop` waits for the encoder to exit after closing its input.
    pub stop_grace: Duration,
    /// A single frame write blocked longer than this marks the encoder as stalled.
    pub write_timeout: Duration,
    /// Frames buffered between the caller and the encoder's stdin.
    pub input_queue: usize,
}

impl FfmpegSinkOpts {
    /// Options with a `veryfast` preset and 2 second keyframe interval.
    pub fn new(size: FrameSize, fps: Fps, destination: StreamDestination) -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            size,
            fps,
            destination,
            preset: "veryfast".to_string(),
            keyframe_secs: 2,
            bg_rgba: [0, 0, 0, 255],
            stop_grace: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
            input_queue: 4,
        }
    }

    /// Check geometry and rate.
    pub fn validate(&self) -> AlertcastResult<()> {
        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(AlertcastError::validation("fps must be non-zero"));
        }
        if self.size.width == 0 || self.size.height == 0 {
            return Err(AlertcastError::validation(
                "ffmpeg sink width/height must be non-zero",
            ));
        }
        if !self.size.width.is_multiple_of(2) || !self.size.height.is_multiple_of(2) {
            return Err(AlertcastError::validation(
                "ffmpeg sink width/height must be even (required for yuv420p output)",
            ));
        }
        if self.binary.trim().is_empty() {
            return Err(AlertcastError::validation("encoder binary must be non-empty"));
        }
        if self.write_timeout.is_zero() {
            return Err(AlertcastError::validation("encoder write timeout must be > 0"));
        }
        if self.input_queue == 0 {
            return Err(AlertcastError::validation("encoder input queue must be > 0"));
        }
        Ok(())
    }

    /// Encoder command-line arguments, including the secret destination.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(format!("{}x{}", self.size.width, self.size.height));
        // For rawvideo input, `-r` before `-i` sets the input framerate.
        args.push("-r".to_string());
        args.push(format!("{}/{}", self.fps.num, self.fps.den));
        args.extend(
            ["-i", "pipe:0", "-an", "-c:v", "libx264", "-preset"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(self.preset.clone());
        args.push("-g".to_string());
        args.push(self.fps.frames_in_secs(self.keyframe_secs).to_string());
        args.extend(
            ["-pix_fmt", "yuv420p", "-f", "flv"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(self.destination.url());
        args
    }
}

/// Owns the encoder's stdin on a dedicated thread.
///
/// Frames are handed over through a bounded queue, so a slow or stuck encoder never blocks the
/// caller. `busy_since_ms` is `0` while idle, otherwise the time the current `write_all` began
/// (milliseconds since `epoch`, plus one).
struct StdinWriter {
    frames: Option<mpsc::SyncSender<Vec<u8>>>,
    recycled: mpsc::Receiver<Vec<u8>>,
    busy_since_ms: Arc<AtomicU64>,
    epoch: Instant,
    handle: Option<JoinHandle<()>>,
}

enum Enqueue {
    Queued,
    Full,
    Closed,
}

impl StdinWriter {
    fn spawn(stdin: ChildStdin, queue: usize) -> AlertcastResult<Self> {
        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(queue);
        let (free_tx, free_rx) = mpsc::channel();
        let busy_since_ms = Arc::new(AtomicU64::new(0));
        let epoch = Instant::now();
        let busy = Arc::clone(&busy_since_ms);
        let handle = std::thread::Builder::new()
            .name("alertcast-encoder-stdin".to_owned())
            .spawn(move || {
                let mut stdin = stdin;
                for buf in rx {
                    busy.store(epoch.elapsed().as_millis() as u64 + 1, Ordering::Relaxed);
                    let res = stdin.write_all(&buf);
                    busy.store(0, Ordering::Relaxed);
                    if let Err(e) = res {
                        tracing::warn!(error = %e, "encoder stdin closed");
                        break;
                    }
                    let _ = free_tx.send(buf);
                }
            })
            .map_err(|e| AlertcastError::encode(format!("failed to spawn stdin writer: {e}")))?;
        Ok(Self {
            frames: Some(tx),
            recycled: free_rx,
            busy_since_ms,
            epoch,
            handle: Some(handle),
        })
    }

    /// How long the in-progress write has been blocked, if one is running.
    fn stalled_for(&self) -> Option<Duration> {
        match self.busy_since_ms.load(Ordering::Relaxed) {
            0 => None,
            started => {
                let started = Duration::from_millis(started - 1);
                Some(self.epoch.elapsed().saturating_sub(started))
            }
        }
    }

    fn take_buffer(&self, len: usize) -> Vec<u8> {
        self.recycled
            .try_recv()
            .ok()
            .filter(|b| b.len() == len)
            .unwrap_or_else(|| vec![0u8; len])
    }

    fn enqueue(&self, buf: Vec<u8>) -> Enqueue {
        let Some(tx) = self.frames.as_ref() else {
            return Enqueue::Closed;
        };
        match tx.try_send(buf) {
            Ok(()) => Enqueue::Queued,
            Err(mpsc::TrySendError::Full(_)) => Enqueue::Full,
            Err(mpsc::TrySendError::Disconnected(_)) => Enqueue::Closed,
        }
    }

    /// Stop accepting frames; the thread drains the queue and then closes stdin.
    fn close(&mut self) {
        self.frames = None;
    }

    /// Wait for the thread. Only call once the child can no longer block its writes.
    fn join(&mut self) {
        self.close();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("encoder stdin writer panicked");
        }
    }
}

/// Sink that spawns `ffmpeg` and streams raw frames to its stdin.
///
/// Writes never block: frames go through a bounded queue to a writer thread. A write that stays
/// blocked longer than `write_timeout`, or an encoder that exits, moves the sink to `Failed` and
/// kills the process. A full queue drops the frame without failing the sink.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,
    state: SinkState,

    child: Option<Child>,
    writer: Option<StdinWriter>,
    stderr_drain: Option<JoinHandle<()>>,

    last_idx: Option<FrameIndex>,
}

impl FfmpegSink {
    /// Create a stopped sink; nothing is spawned until `start`.
    pub fn new(opts: FfmpegSinkOpts) -> AlertcastResult<Self> {
        opts.validate()?;
        Ok(Self {
            opts,
            state: SinkState::Stopped,
            child: None,
            writer: None,
            stderr_drain: None,
            last_idx: None,
        })
    }

    /// Kill whatever is left of a previous encoder process and reap it.
    fn discard_process(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            w.close();
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            match child.wait() {
                Ok(status) => tracing::debug!(%status, "previous encoder reaped"),
                Err(e) => tracing::warn!(error = %e, "failed to reap previous encoder"),
            }
        }
        self.join_threads();
    }

    fn join_threads(&mut self) {
        if let Some(mut w) = self.writer.take() {
            w.join();
        }
        if let Some(handle) = self.stderr_drain.take()
            && handle.join().is_err()
        {
            tracing::warn!("encoder stderr drain thread panicked");
        }
    }

    /// Mark the sink failed and kill the encoder so a blocked writer unblocks.
    fn fail(&mut self, err: AlertcastError) -> AlertcastError {
        self.state = SinkState::Failed;
        if let Some(w) = self.writer.as_mut() {
            w.close();
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
        }
        err
    }

    fn exit_status(&mut self) -> Option<std::process::ExitStatus> {
        self.child.as_mut().and_then(|c| c.try_wait().ok().flatten())
    }

    fn writer_stalled(&self) -> Option<Duration> {
        self.writer
            .as_ref()
            .and_then(StdinWriter::stalled_for)
            .filter(|d| *d >= self.opts.write_timeout)
    }
}

impl FrameSink for FfmpegSink {
    fn start(&mut self) -> AlertcastResult<()> {
        self.discard_process();
        self.state = SinkState::Starting;

        let mut cmd = Command::new(&self.opts.binary);
        cmd.args(self.opts.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            self.fail(AlertcastError::encode(format!(
                "failed to spawn '{}' (is it installed and on PATH?): {e}",
                self.opts.binary
            )))
        })?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(self.fail(AlertcastError::encode(
                "failed to open encoder stdin (unexpected)",
            )));
        };
        if let Some(stderr) = child.stderr.take() {
            self.stderr_drain = Some(std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines() {
                    match line {
                        Ok(line) if !line.trim().is_empty() => {
                            tracing::warn!(target: "alertcast::encoder", "{}", line.trim());
                        }
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
            }));
        }
        self.child = Some(child);
        match StdinWriter::spawn(stdin, self.opts.input_queue) {
            Ok(w) => self.writer = Some(w),
            Err(e) => return Err(self.fail(e)),
        }

        self.state = SinkState::Running;
        tracing::info!(destination = %self.opts.destination, "encoder started");
        Ok(())
    }

    fn write(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> AlertcastResult<()> {
        if self.state != SinkState::Running {
            return Err(AlertcastError::encode("ffmpeg sink is not running"));
        }
        if let Some(last) = self.last_idx
            && idx <= last
        {
            return Err(AlertcastError::encode(
                "ffmpeg sink received out-of-order frame index",
            ));
        }
        if frame.width != self.opts.size.width || frame.height != self.opts.size.height {
            return Err(AlertcastError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, self.opts.size.width, self.opts.size.height
            )));
        }
        let len = self.opts.size.rgba_len();
        if frame.data.len() != len {
            return Err(AlertcastError::validation(
                "frame.data size mismatch with width*height*4",
            ));
        }
        self.last_idx = Some(idx);

        if let Some(status) = self.exit_status() {
            return Err(self.fail(AlertcastError::encode(format!(
                "encoder exited with status {status}"
            ))));
        }
        if let Some(stalled) = self.writer_stalled() {
            return Err(self.fail(AlertcastError::encode(format!(
                "encoder stopped reading input for {} ms",
                stalled.as_millis()
            ))));
        }
        let Some(writer) = self.writer.as_ref() else {
            return Err(self.fail(AlertcastError::encode("encoder stdin is closed")));
        };

        let mut buf = writer.take_buffer(len);
        flatten_to_opaque_rgba8(&mut buf, &frame.data, frame.premultiplied, self.opts.bg_rgba)?;
        match writer.enqueue(buf) {
            Enqueue::Queued => Ok(()),
            Enqueue::Full => Err(AlertcastError::encode(
                "encoder input queue is full; frame dropped",
            )),
            Enqueue::Closed => Err(self.fail(AlertcastError::encode(
                "failed to write frame to encoder stdin",
            ))),
        }
    }

    fn stop(&mut self) -> AlertcastResult<()> {
        if let Some(w) = self.writer.as_mut() {
            w.close();
        }
        let Some(mut child) = self.child.take() else {
            self.join_threads();
            self.state = SinkState::Stopped;
            return Ok(());
        };

        let deadline = Instant::now() + self.opts.stop_grace;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if Instant::now() < deadline && self.writer_stalled().is_none() => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Ok(None) => {
                    tracing::warn!("encoder did not exit after closing stdin; killing it");
                    let _ = child.kill();
                    break child.wait().ok();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to poll encoder exit status");
                    let _ = child.kill();
                    break child.wait().ok();
                }
            }
        };
        self.join_threads();
        self.state = SinkState::Stopped;

        match status {
            Some(status) if status.success() => {
                tracing::info!("encoder stopped");
                Ok(())
            }
            Some(status) => Err(AlertcastError::encode(format!(
                "encoder exited with status {status}"
            ))),
            None => Err(AlertcastError::encode("failed to wait for encoder to exit")),
        }
    }

    fn state(&self) -> SinkState {
        self.state
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.child.is_some() || self.writer.is_some() {
            self.discard_process();
        }
    }
}

/// Return `true` when `binary -version` runs successfully.
pub fn is_encoder_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Opaque straight-alpha copy of `frame` composited over `bg_rgba`.
pub fn flatten_frame(frame: &FrameRGBA, bg_rgba: [u8; 4]) -> AlertcastResult<Vec<u8>> {
    let mut out = vec![0u8; frame.data.len()];
    flatten_to_opaque_rgba8(&mut out, &frame.data, frame.premultiplied, bg_rgba)?;
    Ok(out)
}

fn flatten_to_opaque_rgba8(
    dst: &mut [u8],
    src: &[u8],
    src_is_premul: bool,
    bg_rgba: [u8; 4],
) -> AlertcastResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(AlertcastError::validation(
            "flatten_to_opaque_rgba8 expects equal-length rgba8 buffers",
        ));
    }

    let bg_r = u16::from(bg_rgba[0]);
    let bg_g = u16::from(bg_rgba[1]);
    let bg_b = u16::from(bg_rgba[2]);

    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }

        let inv = 255u16 - a;
        let (r, g, b) = if src_is_premul {
            (
                u16::from(s[0]) + mul_div255_u16(bg_r, inv),
                u16::from(s[1]) + mul_div255_u16(bg_g, inv),
                u16::from(s[2]) + mul_div255_u16(bg_b, inv),
            )
        } else {
            (
                mul_div255_u16(u16::from(s[0]), a) + mul_div255_u16(bg_r, inv),
                mul_div255_u16(u16::from(s[1]), a) + mul_div255_u16(bg_g, inv),
                mul_div255_u16(u16::from(s[2]), a) + mul_div255_u16(bg_b, inv),
            )
        };

        d[0] = r.min(255) as u8;
        d[1] = g.min(255) as u8;
        d[2] = b.min(255) as u8;
        d[3] = 255;
    }

    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/encode/ffmpeg.rs"]
mod tests;
