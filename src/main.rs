//! velomap - handlebar navigation display
//!
//! Serves one phone link at a time, assembles streamed map tiles and route
//! data, and renders a heading-up map plus ride widgets to a small panel.
//!
//! Module structure:
//! - `domain/` - Core types, byte codec and geodesy
//! - `io/` - External interfaces (link, framebuffer, tile cache, camera, battery)
//! - `render/` - Map and widget drawing
//! - `services/` - Session state machine and its subsystems
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use velomap::infra::{Config, Metrics};
use velomap::io::battery::{create_battery_poller, VcgencmdProbe};
use velomap::io::camera::{create_camera, NoCamera, PhotoCapture};
use velomap::io::decoder::ImageDecoder;
use velomap::io::{
    create_cache_writer, create_display_worker, DiskTileCache, FramebufferDisplay, LinkListener, LinkSender,
};
use velomap::render::{Assets, Layout, Renderer};
use velomap::services::battery::{BatteryMonitor, BATTERY_POLL_INTERVAL};
use velomap::services::photo::PhotoTrigger;
use velomap::services::{Peripherals, SessionController, TileStore};

/// Queue depth between the link reader and the session task
const LINK_EVENT_QUEUE: usize = 256;

/// Pending tile writes before the cache starts dropping
const CACHE_WRITE_QUEUE: usize = 32;

/// velomap - bicycle navigation display
#[derive(Parser, Debug)]
#[command(name = "velomap", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "velomap starting");

    let args = Args::parse();
    let config = Config::load(args.config.as_deref());

    info!(
        config_file = %config.config_file(),
        link = %format!("{}:{}", config.link_bind_address(), config.link_port()),
        framebuffer = %config.framebuffer(),
        panel = %format!("{}x{}", config.display_width(), config.display_height()),
        tile_cache_dir = %config.tile_cache_dir().display(),
        request_radius = config.request_radius(),
        inactivity_timeout_ms = config.inactivity_timeout_ms(),
        camera_enabled = config.camera_enabled(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Missing icons are fatal
    let assets = Assets::load(config.assets_dir())?;
    let layout = Layout::for_panel(config.display_width(), config.display_height());
    let renderer = Renderer::new(layout, assets).context("Failed to allocate widget strip")?;

    // Display worker owns the framebuffer
    let panel = FramebufferDisplay::open(
        config.framebuffer(),
        config.backlight(),
        config.max_brightness(),
        config.display_width(),
        config.display_height(),
    )?;
    let (display, display_worker) = create_display_worker(panel);
    thread::Builder::new()
        .name("display".into())
        .spawn(move || display_worker.run_blocking())
        .context("Failed to spawn display worker")?;

    let disk_cache = DiskTileCache::new(config.tile_cache_dir());
    let (tile_cache, cache_writer) = create_cache_writer(disk_cache, CACHE_WRITE_QUEUE);
    thread::Builder::new()
        .name("tile-cache".into())
        .spawn(move || cache_writer.run_blocking())
        .context("Failed to spawn tile cache writer")?;
    let tiles = TileStore::new(Box::new(ImageDecoder), Box::new(tile_cache));

    let camera: Box<dyn PhotoCapture> = if config.camera_enabled() {
        let (capture, capture_worker) = create_camera(config.photos_dir().to_path_buf(), config.geotag());
        thread::Builder::new()
            .name("camera".into())
            .spawn(move || capture_worker.run_blocking())
            .context("Failed to spawn camera worker")?;
        Box::new(capture)
    } else {
        info!("camera_disabled");
        Box::new(NoCamera)
    };

    // vcgencmd forks; polled on its own thread
    let (battery_probe, battery_poller) = create_battery_poller(VcgencmdProbe, BATTERY_POLL_INTERVAL);
    thread::Builder::new()
        .name("battery".into())
        .spawn(move || battery_poller.run_blocking())
        .context("Failed to spawn battery poller")?;

    // Link listener: binding failure is fatal
    let link_sender = Arc::new(LinkSender::new(metrics.clone()));
    let listener = LinkListener::bind(config.link_bind_address(), config.link_port()).await?;
    let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_QUEUE);
    let listener_sender = link_sender.clone();
    let listener_metrics = metrics.clone();
    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        listener.run(event_tx, listener_sender, listener_metrics, listener_shutdown).await;
    });

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let peripherals = Peripherals {
        link: link_sender,
        display,
        renderer,
        tiles,
        photo: PhotoTrigger::new(camera),
        battery: BatteryMonitor::new(Box::new(battery_probe)),
    };
    let mut session = SessionController::new(config, peripherals, metrics.clone());

    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "ctrl_c_handler_failed");
            return;
        }
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Consumes link events until shutdown
    session.run(event_rx, shutdown_rx).await;

    metrics.report().log();
    info!("velomap shutdown complete");
    Ok(())
}
