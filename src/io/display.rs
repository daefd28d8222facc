//! Panel output: framebuffer blits and backlight control
//!
//! The session holds a `DisplayHandle`; a blocking worker thread owns the
//! framebuffer file and the backlight sysfs node so device writes never run on
//! the session task.

use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const MAX_PENDING_BLITS: usize = 2;

/// Pixel output capability (RGB565 pixels, row-major)
pub trait DisplaySink: Send {
    fn blit(&self, x: u32, y: u32, width: u32, height: u32, pixels: &[u16]);
    fn set_backlight(&self, percent: u8);
}

#[derive(Debug)]
pub enum DisplayCommand {
    Blit { x: u32, y: u32, width: u32, height: u32, pixels: Vec<u16>, enqueued_at: Instant },
    Backlight(u8),
}

/// Channel end handed to the session
///
/// Blits are skipped while `MAX_PENDING_BLITS` are still queued since the next
/// dirty frame supersedes them; backlight commands are always delivered.
pub struct DisplayHandle {
    tx: mpsc::UnboundedSender<DisplayCommand>,
    pending_blits: Arc<AtomicUsize>,
}

impl DisplaySink for DisplayHandle {
    fn blit(&self, x: u32, y: u32, width: u32, height: u32, pixels: &[u16]) {
        if self.pending_blits.load(Ordering::Acquire) >= MAX_PENDING_BLITS {
            debug!("display_blit_skipped: worker busy");
            return;
        }
        self.pending_blits.fetch_add(1, Ordering::AcqRel);
        let cmd = DisplayCommand::Blit { x, y, width, height, pixels: pixels.to_vec(), enqueued_at: Instant::now() };
        if self.tx.send(cmd).is_err() {
            self.pending_blits.fetch_sub(1, Ordering::AcqRel);
            warn!("display_worker_closed");
        }
    }

    fn set_backlight(&self, percent: u8) {
        if self.tx.send(DisplayCommand::Backlight(percent)).is_err() {
            warn!("display_worker_closed");
        }
    }
}

/// Linux fbdev panel with sysfs backlight
pub struct FramebufferDisplay {
    framebuffer: Option<File>,
    /// Panel width in pixels (row stride)
    width: u32,
    height: u32,
    backlight: Option<PathBuf>,
    max_brightness: u32,
}

impl FramebufferDisplay {
    /// Open the panel; empty paths run headless / without backlight control
    pub fn open(
        framebuffer: &str,
        backlight: &str,
        max_brightness: u32,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self> {
        let framebuffer = if framebuffer.is_empty() {
            info!("display_headless");
            None
        } else {
            let file = OpenOptions::new()
                .write(true)
                .open(framebuffer)
                .with_context(|| format!("Failed to open framebuffer {framebuffer}"))?;
            Some(file)
        };
        let backlight = (!backlight.is_empty()).then(|| PathBuf::from(backlight));
        Ok(Self { framebuffer, width, height, backlight, max_brightness })
    }

    fn blit(&mut self, x: u32, y: u32, width: u32, height: u32, pixels: &[u16]) -> std::io::Result<()> {
        let Some(fb) = self.framebuffer.as_mut() else {
            return Ok(());
        };
        let visible_w = width.min(self.width.saturating_sub(x)) as usize;
        let mut row_bytes = Vec::with_capacity(visible_w * 2);
        for row in 0..height.min(self.height.saturating_sub(y)) {
            let start = (row * width) as usize;
            let Some(src) = pixels.get(start..start + visible_w) else {
                break;
            };
            row_bytes.clear();
            for px in src {
                row_bytes.extend_from_slice(&px.to_le_bytes());
            }
            let offset = (((y + row) * self.width + x) * 2) as u64;
            fb.seek(SeekFrom::Start(offset))?;
            fb.write_all(&row_bytes)?;
        }
        fb.flush()
    }

    fn set_backlight(&self, percent: u8) -> std::io::Result<()> {
        let Some(path) = &self.backlight else {
            return Ok(());
        };
        let level = brightness_level(percent, self.max_brightness);
        std::fs::write(path, level.to_string())
    }
}

/// Map 0..=100 percent onto the driver's brightness range
pub fn brightness_level(percent: u8, max_brightness: u32) -> u32 {
    percent.min(100) as u32 * max_brightness / 100
}

pub struct DisplayWorker {
    display: FramebufferDisplay,
    rx: mpsc::UnboundedReceiver<DisplayCommand>,
    pending_blits: Arc<AtomicUsize>,
}

impl DisplayWorker {
    /// Run on a dedicated thread until the handle is dropped
    pub fn run_blocking(mut self) {
        info!(width = self.display.width, height = self.display.height, "display_worker_started");
        while let Some(cmd) = self.rx.blocking_recv() {
            match cmd {
                DisplayCommand::Blit { x, y, width, height, pixels, enqueued_at } => {
                    let queue_delay_us = enqueued_at.elapsed().as_micros() as u64;
                    if let Err(e) = self.display.blit(x, y, width, height, &pixels) {
                        warn!(error = %e, "display_blit_failed");
                    }
                    self.pending_blits.fetch_sub(1, Ordering::AcqRel);
                    if queue_delay_us > 50_000 {
                        warn!(queue_delay_us, "display_queue_delay_high");
                    }
                }
                DisplayCommand::Backlight(percent) => {
                    if let Err(e) = self.display.set_backlight(percent) {
                        warn!(error = %e, percent, "backlight_write_failed");
                    } else {
                        debug!(percent, "backlight_set");
                    }
                }
            }
        }
        info!("display_worker_stopped");
    }
}

/// Create the display handle and its worker
pub fn create_display_worker(display: FramebufferDisplay) -> (DisplayHandle, DisplayWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending_blits = Arc::new(AtomicUsize::new(0));
    (DisplayHandle { tx, pending_blits: pending_blits.clone() }, DisplayWorker { display, rx, pending_blits })
}
