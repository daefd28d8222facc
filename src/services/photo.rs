//! Distance-driven and on-demand photo capture

use crate::domain::geo::distance_between;
use crate::io::camera::{PhotoCapture, PhotoRequest};
use time::OffsetDateTime;
use tracing::{debug, info};

pub struct PhotoTrigger {
    capture: Box<dyn PhotoCapture>,
    /// Meters between automatic photos; 0 disables
    distance_per_photo: u16,
    /// Where the last automatic photo was taken (or the first fix)
    reference: Option<(f64, f64)>,
    last_position: Option<(f64, f64)>,
}

impl PhotoTrigger {
    pub fn new(capture: Box<dyn PhotoCapture>) -> Self {
        Self { capture, distance_per_photo: 0, reference: None, last_position: None }
    }

    pub fn distance_per_photo(&self) -> u16 {
        self.distance_per_photo
    }

    pub fn set_distance_per_photo(&mut self, meters: u16) {
        info!(meters, "photo_distance_set");
        self.distance_per_photo = meters;
        if meters == 0 {
            self.reference = None;
        }
    }

    /// Capture now, tagged with the latest known position
    pub fn take_photo(&self) {
        self.capture.capture(PhotoRequest { position: self.last_position, requested_at: OffsetDateTime::now_utc() });
    }

    /// Feed a fix; returns true when it triggered a capture
    pub fn on_location(&mut self, latitude: f64, longitude: f64) -> bool {
        self.last_position = Some((latitude, longitude));
        if self.distance_per_photo == 0 {
            return false;
        }

        let Some((ref_lat, ref_lon)) = self.reference else {
            self.reference = Some((latitude, longitude));
            return false;
        };

        let distance = distance_between(ref_lat, ref_lon, latitude, longitude);
        if distance < self.distance_per_photo as f64 {
            return false;
        }

        debug!(distance_m = %format!("{distance:.1}"), "photo_distance_reached");
        self.reference = Some((latitude, longitude));
        self.take_photo();
        true
    }
}
