//! Still camera capture via `libcamera-still`
//!
//! Captures run on a dedicated worker thread; the session only enqueues.
//! Output: `<photos_dir>/<unix seconds>.jpg`, GPS-tagged with `exiftool` when
//! a position is known. The GPS date and time stamps carry the request time in UTC.

use std::path::{Path, PathBuf};
use std::process::Command;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

const CAPTURE_QUEUE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotoRequest {
    /// Position to tag the photo with, if known
    pub position: Option<(f64, f64)>,
    pub requested_at: OffsetDateTime,
}

/// Photo capture capability
pub trait PhotoCapture: Send {
    fn capture(&self, request: PhotoRequest);
}

/// Enqueues captures for a `CaptureWorker`
pub struct LibcameraCapture {
    tx: mpsc::Sender<PhotoRequest>,
}

impl PhotoCapture for LibcameraCapture {
    fn capture(&self, request: PhotoRequest) {
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("photo_dropped: capture in progress"),
            Err(TrySendError::Closed(_)) => warn!("photo_worker_closed"),
        }
    }
}

/// Capture sink used when the camera is disabled
#[derive(Debug, Default)]
pub struct NoCamera;

impl PhotoCapture for NoCamera {
    fn capture(&self, _request: PhotoRequest) {
        debug!("photo_ignored: camera disabled");
    }
}

pub struct CaptureWorker {
    photos_dir: PathBuf,
    geotag: bool,
    rx: mpsc::Receiver<PhotoRequest>,
}

impl CaptureWorker {
    /// Run on a dedicated thread until the capture handle is dropped
    pub fn run_blocking(mut self) {
        info!(dir = %self.photos_dir.display(), geotag = self.geotag, "camera_worker_started");
        while let Some(request) = self.rx.blocking_recv() {
            match self.take_photo(&request) {
                Ok(path) => info!(path = %path.display(), "photo_taken"),
                Err(e) => warn!(error = %format!("{e:#}"), "photo_failed"),
            }
        }
        info!("camera_worker_stopped");
    }

    fn take_photo(&self, request: &PhotoRequest) -> anyhow::Result<PathBuf> {
        use anyhow::Context;

        std::fs::create_dir_all(&self.photos_dir)
            .with_context(|| format!("Failed to create {}", self.photos_dir.display()))?;
        let path = photo_path(&self.photos_dir, request.requested_at);

        let status = Command::new("libcamera-still")
            .args(["-n", "--immediate", "--autofocus-on-capture", "-o"])
            .arg(&path)
            .status()
            .context("Failed to run libcamera-still")?;
        anyhow::ensure!(status.success(), "libcamera-still exited with {status}");

        if let (true, Some((lat, lon))) = (self.geotag, request.position) {
            let status = Command::new("exiftool")
                .args(geotag_args(lat, lon, request.requested_at))
                .arg("-overwrite_original")
                .arg(&path)
                .status()
                .context("Failed to run exiftool")?;
            if !status.success() {
                warn!(path = %path.display(), status = %status, "photo_geotag_failed");
            }
        }
        Ok(path)
    }
}

pub fn photo_path(dir: &Path, at: OffsetDateTime) -> PathBuf {
    dir.join(format!("{}.jpg", at.unix_timestamp()))
}

fn geotag_args(latitude: f64, longitude: f64, at: OffsetDateTime) -> Vec<String> {
    let lat_ref = if latitude < 0.0 { "S" } else { "N" };
    let lon_ref = if longitude < 0.0 { "W" } else { "E" };
    let mut args = vec![
        format!("-GPSLatitude={:.6}", latitude.abs()),
        format!("-GPSLatitudeRef={lat_ref}"),
        format!("-GPSLongitude={:.6}", longitude.abs()),
        format!("-GPSLongitudeRef={lon_ref}"),
    ];

    // EXIF GPS stamps are always UTC
    let utc = at.to_offset(UtcOffset::UTC);
    match (
        utc.format(format_description!("[year]:[month]:[day]")),
        utc.format(format_description!("[hour]:[minute]:[second]")),
    ) {
        (Ok(date), Ok(clock)) => {
            args.push(format!("-GPSDateStamp={date}"));
            args.push(format!("-GPSTimeStamp={clock}"));
        }
        (Err(e), _) | (_, Err(e)) => warn!(error = %e, "photo_gps_time_unformattable"),
    }
    args
}

/// Create the capture handle and its worker
pub fn create_camera(photos_dir: PathBuf, geotag: bool) -> (LibcameraCapture, CaptureWorker) {
    let (tx, rx) = mpsc::channel(CAPTURE_QUEUE);
    (LibcameraCapture { tx }, CaptureWorker { photos_dir, geotag, rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_photo_path_uses_unix_seconds() {
        let at = datetime!(2024-06-01 12:00:00 UTC);
        assert_eq!(photo_path(Path::new("photos"), at), PathBuf::from("photos/1717243200.jpg"));
    }

    #[test]
    fn test_geotag_hemispheres() {
        let args = geotag_args(-33.8688, 151.2093, datetime!(2024-06-01 12:00:00 UTC));
        assert_eq!(args[0], "-GPSLatitude=33.868800");
        assert_eq!(args[1], "-GPSLatitudeRef=S");
        assert_eq!(args[3], "-GPSLongitudeRef=E");
    }

    #[test]
    fn test_geotag_time_stamps_in_utc() {
        let at = datetime!(2024-06-01 01:30:05 +02:00);
        let args = geotag_args(50.0, 20.0, at);
        assert_eq!(args[4], "-GPSDateStamp=2024:05:31");
        assert_eq!(args[5], "-GPSTimeStamp=23:30:05");
        assert_eq!(photo_path(Path::new("p"), at), PathBuf::from("p/1717198205.jpg"));
    }

    #[test]
    fn test_capture_queue_bounded() {
        let (capture, _worker) = create_camera(PathBuf::from("photos"), false);
        let request = PhotoRequest { position: None, requested_at: OffsetDateTime::now_utc() };
        for _ in 0..CAPTURE_QUEUE + 2 {
            capture.capture(request);
        }
        assert_eq!(capture.tx.capacity(), 0);
    }
}
