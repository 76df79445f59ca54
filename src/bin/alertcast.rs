use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use alertcast::encode::ffmpeg::{flatten_frame, is_encoder_available};
use alertcast::{
    FfmpegSink, FilterPolicy, Fps, RefreshMode, Scheduler, StopHandle, StreamConfig, StreamKey,
};

#[derive(Parser, Debug)]
#[command(name = "alertcast", version, about = "Severe-weather alert overlay streamer")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the overlay continuously and stream it until interrupted.
    Stream(StreamArgs),
    /// Fetch once and render a single frame as a PNG.
    Frame(FrameArgs),
    /// Fetch once and print the filtered, ordered alerts as JSON.
    Alerts(CommonArgs),
}

/// Settings shared by every command. Each flag overrides the config file.
#[derive(Args, Debug)]
struct CommonArgs {
    /// JSON config file; flags and environment variables override it.
    #[arg(long, env = "ALERTCAST_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Frame rate as `num` or `num/den`.
    #[arg(long, value_parser = parse_fps)]
    fps: Option<Fps>,

    /// Seconds between successful alert refreshes.
    #[arg(long)]
    refresh_secs: Option<u64>,

    /// Ticker pixels per frame.
    #[arg(long)]
    scroll_step: Option<u32>,

    #[arg(long)]
    fetch_timeout_secs: Option<u64>,

    #[arg(long, env = "ALERTCAST_FEED_URL")]
    feed_url: Option<String>,

    /// Read alerts from a saved feed document instead of the network.
    #[arg(long)]
    feed_file: Option<PathBuf>,

    #[arg(long, value_enum)]
    filter: Option<FilterPolicy>,

    #[arg(long, value_enum)]
    refresh_mode: Option<RefreshMode>,

    /// Maximum side panel entries.
    #[arg(long)]
    panel_cap: Option<usize>,

    #[arg(long)]
    title: Option<String>,

    /// Regular font file.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Bold font file.
    #[arg(long)]
    font_bold: Option<PathBuf>,

    /// Image snapshot drawn in the aux zone, re-read on every refresh.
    #[arg(long)]
    aux_image: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct StreamArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Secret stream key appended to the ingest URL.
    #[arg(long, env = "ALERTCAST_STREAM_KEY", hide_env_values = true)]
    stream_key: Option<String>,

    #[arg(long, env = "ALERTCAST_INGEST_URL")]
    ingest_url: Option<String>,

    /// Encoder executable.
    #[arg(long)]
    encoder: Option<String>,

    /// Encoder speed preset.
    #[arg(long)]
    preset: Option<String>,
}

#[derive(Args, Debug)]
struct FrameArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Horizontal crawl position in pixels.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    ticker_offset: i64,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Stream(args) => cmd_stream(args),
        Command::Frame(args) => cmd_frame(args),
        Command::Alerts(args) => cmd_alerts(args),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("alertcast=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_fps(s: &str) -> Result<Fps, String> {
    let (num, den) = match s.split_once('/') {
        Some((n, d)) => (n.trim(), d.trim()),
        None => (s.trim(), "1"),
    };
    let num: u32 = num.parse().map_err(|_| format!("invalid fps numerator '{num}'"))?;
    let den: u32 = den.parse().map_err(|_| format!("invalid fps denominator '{den}'"))?;
    Fps::new(num, den).map_err(|e| e.to_string())
}

impl CommonArgs {
    fn load(&self) -> anyhow::Result<StreamConfig> {
        let mut cfg = match &self.config {
            Some(path) => StreamConfig::from_json_file(path)?,
            None => StreamConfig::default(),
        };
        if let Some(v) = self.width {
            cfg.width = v;
        }
        if let Some(v) = self.height {
            cfg.height = v;
        }
        if let Some(v) = self.fps {
            cfg.fps = v;
        }
        if let Some(v) = self.refresh_secs {
            cfg.refresh_secs = v;
        }
        if let Some(v) = self.scroll_step {
            cfg.scroll_step = v;
        }
        if let Some(v) = self.fetch_timeout_secs {
            cfg.fetch_timeout_secs = v;
        }
        if let Some(v) = &self.feed_url {
            cfg.feed_url = v.clone();
        }
        if let Some(v) = &self.feed_file {
            cfg.feed_file = Some(v.clone());
        }
        if let Some(v) = self.filter {
            cfg.filter = v;
        }
        if let Some(v) = self.refresh_mode {
            cfg.refresh_mode = v;
        }
        if let Some(v) = self.panel_cap {
            cfg.panel_cap = v;
        }
        if let Some(v) = &self.title {
            cfg.title = v.clone();
        }
        if let Some(v) = &self.font {
            cfg.font_regular = v.clone();
        }
        if let Some(v) = &self.font_bold {
            cfg.font_bold = Some(v.clone());
        }
        if let Some(v) = &self.aux_image {
            cfg.aux_image = Some(v.clone());
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn cmd_stream(args: StreamArgs) -> anyhow::Result<()> {
    let mut cfg = args.common.load()?;
    if let Some(key) = args.stream_key.filter(|k| !k.trim().is_empty()) {
        cfg.stream_key = Some(StreamKey::new(key));
    }
    if let Some(v) = args.ingest_url {
        cfg.ingest_url = v;
    }
    if let Some(v) = args.encoder {
        cfg.encoder = v;
    }
    if let Some(v) = args.preset {
        cfg.preset = v;
    }

    // Resolve the destination before touching fonts or spawning anything.
    let sink_opts = cfg.sink_opts()?;
    if !is_encoder_available(&sink_opts.binary) {
        tracing::warn!(
            encoder = %sink_opts.binary,
            "encoder not runnable; the stream will keep retrying with backoff"
        );
    }
    tracing::info!(
        destination = %sink_opts.destination,
        width = cfg.width,
        height = cfg.height,
        fps = cfg.fps.as_f64(),
        "starting stream"
    );

    let canvas = cfg.cpu_canvas()?;
    let sink = FfmpegSink::new(sink_opts)?;

    let stop = StopHandle::new();
    stop.stop_on_signals(&[signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM])?;

    let mut scheduler = Scheduler::new(
        cfg.scheduler_opts(),
        cfg.compositor()?,
        Box::new(canvas),
        Box::new(sink),
        cfg.alert_source()?,
        cfg.aux_provider(),
    )?
    .with_stop_handle(stop);

    let stats = scheduler.run();
    eprintln!(
        "stream stopped: {} frames written, {} dropped, {} encoder restarts",
        stats.frames_written, stats.frames_dropped, stats.sink_restarts
    );
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let cfg = args.common.load()?;
    let alerts = cfg.alert_source()?.fetch().context("fetch alerts")?;
    let aux = match cfg.aux_provider() {
        Some(mut p) => p.refresh().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "aux image unavailable");
            None
        }),
        None => None,
    };

    let mut canvas = cfg.cpu_canvas()?;
    let rendered = cfg
        .compositor()?
        .render(&mut canvas, &alerts, args.ticker_offset, aux.as_ref())?;
    let rgba = flatten_frame(&rendered.frame, [0, 0, 0, 255])?;

    write_png(&args.out, &rgba, rendered.frame.width, rendered.frame.height)?;
    eprintln!("wrote {} ({} alerts)", args.out.display(), alerts.len());
    Ok(())
}

fn cmd_alerts(args: CommonArgs) -> anyhow::Result<()> {
    let cfg = args.load()?;
    let mut source = cfg.alert_source()?;
    let alerts = source.fetch().context("fetch alerts")?;
    let json = serde_json::to_string_pretty(&alerts).context("serialize alerts")?;
    println!("{json}");
    Ok(())
}

fn write_png(path: &Path, rgba: &[u8], width: u32, height: u32) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        path,
        rgba,
        width,
        height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", path.display()))
}
