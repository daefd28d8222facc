//! Battery and SoC temperature probes

use parking_lot::Mutex;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryReading {
    /// Charge 0..=100, `None` when the board has no fuel gauge
    pub percentage: Option<u8>,
    /// SoC temperature in °C
    pub temperature_c: Option<f32>,
}

pub trait BatteryProbe: Send {
    fn read(&self) -> BatteryReading;
}

/// Raspberry Pi probe: `vcgencmd measure_temp`
#[derive(Debug, Default)]
pub struct VcgencmdProbe;

impl BatteryProbe for VcgencmdProbe {
    fn read(&self) -> BatteryReading {
        let temperature_c = match Command::new("vcgencmd").arg("measure_temp").output() {
            Ok(output) if output.status.success() => {
                parse_measure_temp(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!(status = %output.status, "vcgencmd_failed");
                None
            }
            Err(e) => {
                debug!(error = %e, "vcgencmd_unavailable");
                None
            }
        };
        BatteryReading { percentage: None, temperature_c }
    }
}

/// Parse `temp=45.6'C`
pub fn parse_measure_temp(output: &str) -> Option<f32> {
    let value = output.trim().strip_prefix("temp=")?;
    let end = value.find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-')).unwrap_or(value.len());
    value[..end].parse().ok()
}

/// Latest reading published by a `BatteryPoller`; never blocks
#[derive(Debug, Clone, Default)]
pub struct CachedProbe {
    latest: Arc<Mutex<BatteryReading>>,
}

impl BatteryProbe for CachedProbe {
    fn read(&self) -> BatteryReading {
        *self.latest.lock()
    }
}

/// Runs a shell-backed probe on its own thread
pub struct BatteryPoller<P> {
    probe: P,
    latest: Arc<Mutex<BatteryReading>>,
    interval: Duration,
}

impl<P: BatteryProbe> BatteryPoller<P> {
    /// Poll every `interval` until the `CachedProbe` is dropped
    pub fn run_blocking(self) {
        info!(interval_ms = self.interval.as_millis() as u64, "battery_poller_started");
        while Arc::strong_count(&self.latest) > 1 {
            let reading = self.probe.read();
            *self.latest.lock() = reading;
            std::thread::sleep(self.interval);
        }
        info!("battery_poller_stopped");
    }
}

pub fn create_battery_poller<P: BatteryProbe>(probe: P, interval: Duration) -> (CachedProbe, BatteryPoller<P>) {
    let latest = Arc::new(Mutex::new(BatteryReading::default()));
    (CachedProbe { latest: latest.clone() }, BatteryPoller { probe, latest, interval })
}
