//! Throttled battery and temperature monitoring

use crate::io::battery::BatteryProbe;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const BATTERY_POLL_INTERVAL: Duration = Duration::from_millis(5000);
/// Above this the device is considered overheating (°C)
pub const DANGEROUS_TEMPERATURE_C: f32 = 90.0;

pub struct BatteryMonitor {
    probe: Box<dyn BatteryProbe>,
    last_poll: Option<Instant>,
    percentage: u8,
    temperature_c: Option<f32>,
}

impl BatteryMonitor {
    pub fn new(probe: Box<dyn BatteryProbe>) -> Self {
        Self { probe, last_poll: None, percentage: 100, temperature_c: None }
    }

    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    pub fn temperature_c(&self) -> Option<f32> {
        self.temperature_c
    }

    pub fn is_overheated(&self) -> bool {
        self.temperature_c.is_some_and(|t| t > DANGEROUS_TEMPERATURE_C)
    }

    /// Poll the probe at most every `BATTERY_POLL_INTERVAL`
    ///
    /// Returns true when the displayed state changed (percentage or
    /// overheating).
    pub fn update(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_poll {
            if now.saturating_duration_since(last) < BATTERY_POLL_INTERVAL {
                return false;
            }
        }
        self.last_poll = Some(now);

        let reading = self.probe.read();
        let was_overheated = self.is_overheated();
        let old_percentage = self.percentage;

        if let Some(percentage) = reading.percentage {
            self.percentage = percentage.min(100);
        }
        if reading.temperature_c.is_some() {
            self.temperature_c = reading.temperature_c;
        }
        debug!(percentage = self.percentage, temperature_c = ?self.temperature_c, "battery_polled");

        let overheated = self.is_overheated();
        if overheated && !was_overheated {
            warn!(temperature_c = ?self.temperature_c, "device_overheating");
        }
        overheated != was_overheated || self.percentage != old_percentage
    }
}
