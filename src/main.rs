//! camcal: live chessboard capture for offline camera calibration

use camcal::capture::{SyntheticPort, VideoPort};
use camcal::detect::ChessboardDetector;
use camcal::display::{HeadlessDisplay, HeadlessText, OverlayRenderer};
use camcal::pipeline::Pipeline;
use camcal::{Config, DisplayBackend, SourceKind};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread", worker_threads = 1)]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camcal=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("camcal launching");

    let mut config = Config::load().wrap_err("loading configuration")?;
    let port = open_source(&mut config).wrap_err("opening video source")?;
    let renderer = open_display(&config).wrap_err("opening display")?;

    let pipeline = Pipeline::start(&config, port, ChessboardDetector::default(), renderer)
        .wrap_err("starting capture pipeline")?;

    let stop = pipeline.stop_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                stop.request_stop();
            }
            Err(err) => error!(error = %err, "cannot listen for Ctrl-C"),
        }
    });

    // the display is not Send, so the consumer stays on this thread
    let summary = tokio::task::block_in_place(|| pipeline.run());
    info!(
        cycles = summary.cycles,
        calibration_frames = summary.calibration_frames,
        dropped = summary.dropped,
        log = %config.log.path.display(),
        "camcal shutting down"
    );
    Ok(())
}

fn open_source(config: &mut Config) -> Result<Box<dyn VideoPort>> {
    let grid = config.pattern.grid();
    match config.source.kind {
        SourceKind::Synthetic => {
            info!("Using synthetic chessboard source");
            Ok(Box::new(SyntheticPort::demo(
                grid,
                config.capture.width,
                config.capture.height,
            )))
        }
        SourceKind::Still => {
            let path = config
                .source
                .still_path
                .as_deref()
                .ok_or_else(|| eyre!("still source without source.still_path"))?;
            Ok(Box::new(SyntheticPort::still(path, grid)?))
        }
        SourceKind::Camera => open_camera(config),
    }
}

#[cfg(feature = "v4l2")]
fn open_camera(config: &mut Config) -> Result<Box<dyn VideoPort>> {
    use camcal::capture::V4l2Port;
    use camcal::utils;

    if config.capture.device.is_empty() {
        let found = utils::auto_detect_device()?;
        config.capture.device = found.path;
        config.capture.format = found.format;
    }
    info!("Using capture device: {}", config.capture.device);
    Ok(Box::new(V4l2Port::open(&config.capture.device)?))
}

#[cfg(not(feature = "v4l2"))]
fn open_camera(_config: &mut Config) -> Result<Box<dyn VideoPort>> {
    color_eyre::eyre::bail!("camera source needs the `v4l2` feature; set source.kind = \"synthetic\" or \"still\"")
}

fn open_display(config: &Config) -> Result<OverlayRenderer> {
    let frame_width = config.capture.width;
    match config.display.backend {
        DisplayBackend::Headless => {
            info!("Running without a display window");
            Ok(OverlayRenderer::new(
                &config.overlay,
                frame_width,
                Box::new(HeadlessDisplay::new(config.display.width, config.display.height)),
                Box::new(HeadlessText),
            ))
        }
        DisplayBackend::Window => open_window(config),
    }
}

#[cfg(feature = "sdl")]
fn open_window(config: &Config) -> Result<OverlayRenderer> {
    use camcal::display::{Sdl2Display, TtfTextPainter};

    let display = Sdl2Display::new(&config.display, config.overlay.mirror)?;
    let painter = TtfTextPainter::new(&config.overlay.font_path, config.overlay.font_size)?;
    Ok(OverlayRenderer::new(
        &config.overlay,
        config.capture.width,
        Box::new(display),
        Box::new(painter),
    ))
}

#[cfg(not(feature = "sdl"))]
fn open_window(_config: &Config) -> Result<OverlayRenderer> {
    color_eyre::eyre::bail!("window display needs the `sdl` feature; set display.backend = \"headless\"")
}
