use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use painter::board::{BoardMirror, MirrorError};
use painter::colors::Palette;
use painter::config::{DEFAULT_COOLDOWN_MS, EngineConfig};
use painter::preview::{self, PREVIEW_INTERVAL, PreviewWriter};
use painter::quantize::{Dither, QuantizeError, SourceImage, quantize};
use painter::scheduler::{Painter, PainterConfig, PainterEvent};
use painter::session::{Session, SessionError, parse_sessions};

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid image: {0}")]
    Quantize(#[from] QuantizeError),
    #[error("invalid session file: {0}")]
    Session(#[from] SessionError),
    #[error("failed to start board mirror: {0}")]
    Mirror(#[from] MirrorError),
}

#[derive(Parser, Debug)]
#[command(name = "painter", about = "Repaint a remote paint board with an image")]
struct Cli {
    /// Source PNG; pixels with alpha below 0x80 are left alone.
    png: PathBuf,

    /// Board x of the image's left edge.
    #[arg(allow_negative_numbers = true)]
    x: i32,

    /// Board y of the image's top edge.
    #[arg(allow_negative_numbers = true)]
    y: i32,

    /// Session file of `uid,client_id` lines. Without one the painter only watches.
    #[arg(short, long, env = "PAINTER_SESSIONS")]
    sessions: Option<PathBuf>,

    /// Paint the targets in random order.
    #[arg(short, long, env = "PAINTER_RANDOMIZE")]
    randomize: bool,

    /// Per-session cooldown in milliseconds.
    #[arg(short = 't', long, env = "PAINTER_COOLDOWN_MS", default_value_t = DEFAULT_COOLDOWN_MS)]
    cooldown: u64,

    /// Write a preview PNG of the board with the targets drawn over it.
    #[arg(short, long, env = "PAINTER_PREVIEW")]
    preview: Option<PathBuf>,

    /// Map each pixel to its nearest color without error diffusion.
    #[arg(long)]
    no_dither: bool,

    #[arg(long, hide = true, env = "PAINTER_BOARD_URL")]
    board_url: Option<String>,

    #[arg(long, hide = true, env = "PAINTER_PAINT_URL")]
    paint_url: Option<String>,

    #[arg(long, hide = true, env = "PAINTER_SOCKET_URL")]
    socket_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let palette = Palette::default();
    let dither = if cli.no_dither { Dither::None } else { Dither::FloydSteinberg };
    let targets = quantize(&load_image(&cli.png)?, cli.x, cli.y, &palette, dither);
    info!(pixels = targets.len(), "image quantized");

    let sessions = match &cli.sessions {
        Some(path) => load_sessions(path)?,
        None => Vec::new(),
    };
    if sessions.is_empty() {
        info!("no sessions; starting in watch mode");
    } else {
        info!(sessions = sessions.len(), "using sessions");
    }

    let mut config = EngineConfig::from_env();
    if let Some(url) = cli.board_url {
        config.board_url = url;
    }
    if let Some(url) = cli.paint_url {
        config.paint_url = url;
    }
    if let Some(url) = cli.socket_url {
        config.socket_url = url;
    }
    let cooldown = Duration::from_millis(cli.cooldown);
    let painter_config = PainterConfig { cooldown, randomize: cli.randomize, confirm_timeout: None };

    let mirror = BoardMirror::start(config, palette)?;
    let (mut painter, mut events) = Painter::start(Arc::new(mirror.clone()), targets, sessions, painter_config);
    let mut preview = cli.preview.map(|path| PreviewWriter::new(path, PREVIEW_INTERVAL));

    let mut ticker = tokio::time::interval(PREVIEW_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut last_remaining = None;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(err) = result {
                    warn!(error = %err, "failed to listen for ctrl-c");
                }
                info!("shutting down");
                break;
            }
            _ = ticker.tick() => {}
            event = events.recv() => match event {
                Ok(event) => {
                    if report(&event, &mut last_remaining) {
                        if let Some(writer) = preview.as_mut() {
                            writer.mark_dirty(Instant::now());
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "console fell behind painter events"),
                Err(RecvError::Closed) => break,
            },
        }
        if let Some(writer) = preview.as_mut() {
            if writer.is_due(Instant::now()) {
                save_preview(writer, &mirror, &painter);
            }
        }
    }

    painter.shutdown();
    if let Some(writer) = preview.as_mut() {
        if writer.is_due(Instant::now()) {
            save_preview(writer, &mirror, &painter);
        }
    }
    mirror.close();
    Ok(())
}

fn load_image(path: &Path) -> Result<SourceImage, AppError> {
    let rgba = image::open(path)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(SourceImage::new(width, height, rgba.into_raw())?)
}

fn load_sessions(path: &Path) -> Result<Vec<Session>, AppError> {
    let text = std::fs::read_to_string(path).map_err(|source| AppError::Read { path: path.to_path_buf(), source })?;
    Ok(parse_sessions(&text)?)
}

/// Log one painter event. Returns whether the board picture changed.
fn report(event: &PainterEvent, last_remaining: &mut Option<usize>) -> bool {
    match event {
        PainterEvent::Load { width, height, pixels, remaining } => {
            info!(width, height, "board loaded");
            info!(pixels = pixels.len(), "targets on the board");
            report_remaining(*remaining, last_remaining);
            true
        }
        PainterEvent::Update { remaining, .. } | PainterEvent::Resync { remaining } => {
            report_remaining(*remaining, last_remaining);
            true
        }
        PainterEvent::Paint { actor, pixel } => {
            info!(actor, x = pixel.x, y = pixel.y, color = pixel.color, "painted");
            false
        }
        PainterEvent::Error { actor, error } => {
            warn!(actor, error = %error, "paint failed");
            false
        }
        PainterEvent::Paused => {
            info!("board reloading; painting paused");
            false
        }
    }
}

fn report_remaining(remaining: usize, last: &mut Option<usize>) {
    if *last != Some(remaining) {
        *last = Some(remaining);
        info!(remaining, "pixels remaining");
    }
}

fn save_preview(writer: &mut PreviewWriter, mirror: &BoardMirror, painter: &Painter) {
    let Some(snapshot) = mirror.snapshot() else {
        return;
    };
    let image = preview::render(&snapshot, &painter.targets(), mirror.palette());
    info!(path = %writer.path().display(), "saving preview");
    if let Err(err) = writer.write(&image, Instant::now()) {
        warn!(error = %err, "failed to save preview");
    }
}
