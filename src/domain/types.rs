//! Shared types for the navigation display

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tile address in the standard web-map scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileKey {
    #[inline]
    pub const fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }
}

/// Rendered as `x_y_z`, the form used for cache file names
impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.x, self.y, self.zoom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tile key: {0:?}")]
pub struct ParseTileKeyError(pub String);

impl FromStr for TileKey {
    type Err = ParseTileKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTileKeyError(s.to_string());
        let mut parts = s.splitn(3, '_');
        let x = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let y = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let zoom = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        Ok(Self { x, y, zoom })
    }
}

/// GPS fix as received from the phone
///
/// `speed` is km/h (converted from the wire's m/s), `heading` is degrees
/// clockwise from north. `previous_timestamp` holds the timestamp this
/// location carried before its latest update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub heading: f64,
    pub altitude: f64,
    pub altitude_accuracy: f64,
    pub horizontal_accuracy: f64,
    pub timestamp: u64,
    pub previous_timestamp: u64,
}

/// Decoded location payload before it is folded into the session's snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters per second, as sent on the wire
    pub speed_mps: f64,
    pub heading: f64,
    pub altitude: f64,
    pub altitude_accuracy: f64,
    pub horizontal_accuracy: f64,
    pub timestamp: u64,
    pub zoom: u8,
}

/// Route point in sender order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TourPoint {
    pub index: u16,
    pub latitude: f32,
    pub longitude: f32,
}

/// Route point projected onto the tile grid at the index's zoom
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusteredPoint {
    pub index: u16,
    pub tile_x: f64,
    pub tile_y: f64,
}

/// Point of interest marker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointOfInterest {
    pub latitude: f32,
    pub longitude: f32,
}

/// Screen regions that can be redrawn independently
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    pub map: bool,
    pub speed: bool,
    pub direction: bool,
    pub slope: bool,
    pub battery: bool,
}

impl DirtyFlags {
    pub const ALL: Self = Self { map: true, speed: true, direction: true, slope: true, battery: true };

    #[inline]
    pub fn any(&self) -> bool {
        self.map || self.speed || self.direction || self.slope || self.battery
    }

    /// Return current flags and clear them
    #[inline]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    #[inline]
    pub fn merge(&mut self, other: Self) {
        self.map |= other.map;
        self.speed |= other.speed;
        self.direction |= other.direction;
        self.slope |= other.slope;
        self.battery |= other.battery;
    }
}
