//! Geographic math: Web Mercator tile projection, great-circle distance, slope

use super::types::{Location, TileKey};
use std::f64::consts::PI;

/// Mean Earth radius used by the haversine distance (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Equatorial circumference used for ground resolution (meters)
pub const EARTH_CIRCUMFERENCE_M: f64 = 40_075_016.686;

/// Deepest zoom level the phone may ask for
pub const MAX_ZOOM: u8 = 22;

/// Tiles along one axis of the grid at `zoom`; `None` above `MAX_ZOOM`
#[inline]
pub fn tiles_per_axis(zoom: u8) -> Option<i64> {
    if zoom > MAX_ZOOM {
        return None;
    }
    1i64.checked_shl(zoom as u32)
}

/// Fractional Web Mercator tile coordinate at a given zoom
///
/// The integer part addresses the tile, the fractional part is the position
/// inside it (0..1 on both axes, origin at the tile's north-west corner).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePosition {
    pub x: f64,
    pub y: f64,
    pub zoom: u8,
}

impl TilePosition {
    /// Project latitude/longitude (degrees) onto the tile grid at `zoom`
    #[inline]
    pub fn from_lat_lon(latitude: f64, longitude: f64, zoom: u8) -> Self {
        let n = 2.0_f64.powi(zoom as i32);
        let lat_rad = latitude * PI / 180.0;
        let x = (longitude + 180.0) / 360.0 * n;
        let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n;
        Self { x, y, zoom }
    }

    /// Key of the tile covering this position
    #[inline]
    pub fn tile_key(&self) -> TileKey {
        TileKey::new(self.x.max(0.0) as u32, self.y.max(0.0) as u32, self.zoom)
    }

    /// Inverse projection back to (latitude, longitude) degrees
    pub fn to_lat_lon(&self) -> (f64, f64) {
        let n = 2.0_f64.powi(self.zoom as i32);
        let longitude = self.x / n * 360.0 - 180.0;
        let latitude = (PI * (1.0 - 2.0 * self.y / n)).sinh().atan() * 180.0 / PI;
        (latitude, longitude)
    }
}

#[inline]
pub fn degrees_to_radians(degrees: f64) -> f64 {
    degrees * PI / 180.0
}

#[inline]
pub fn meters_per_second_to_km_per_hour(meters_per_second: f64) -> f64 {
    meters_per_second * 3.6
}

/// Great-circle distance between two coordinates in meters (haversine formula)
pub fn distance_between(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = degrees_to_radians(lat2 - lat1);
    let d_lon = degrees_to_radians(lon2 - lon1);
    let a = (d_lat / 2.0).sin().powi(2)
        + degrees_to_radians(lat1).cos()
            * degrees_to_radians(lat2).cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Ground distance covered by one pixel of a `tile_width_px` wide tile
pub fn meters_per_pixel(latitude: f64, zoom: u8, tile_width_px: u32) -> f64 {
    let n = 2.0_f64.powi(zoom as i32);
    (EARTH_CIRCUMFERENCE_M * degrees_to_radians(latitude).cos() / n) / tile_width_px.max(1) as f64
}

/// Road grade in percent for a slope angle in radians
#[inline]
pub fn grade_percent(slope: f64) -> f64 {
    slope.tan() * 100.0
}

/// Weighted mean where the i-th value (1-based) has weight i
///
/// Later entries count more; an empty slice yields 0.
pub fn linearly_weighted_average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (i, value) in values.iter().enumerate() {
        let weight = (i + 1) as f64;
        weighted_sum += value * weight;
        weight_total += weight;
    }
    weighted_sum / weight_total
}

/// Road slope in radians estimated from consecutive location samples
///
/// Each consecutive pair contributes `atan(Δaltitude / Δdistance)`; pairs with
/// no horizontal distance (NaN) contribute zero.
pub fn calculate_slope<'a, I>(history: I) -> f64
where
    I: IntoIterator<Item = &'a Location>,
{
    let mut measurements = Vec::new();
    let mut previous: Option<&Location> = None;
    for location in history {
        if let Some(prev) = previous {
            let altitude_difference = location.altitude - prev.altitude;
            let distance = distance_between(
                prev.latitude,
                prev.longitude,
                location.latitude,
                location.longitude,
            );
            let slope = (altitude_difference / distance).atan();
            measurements.push(if slope.is_nan() { 0.0 } else { slope });
        }
        previous = Some(location);
    }
    linearly_weighted_average(&measurements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(latitude: f64, longitude: f64, altitude: f64) -> Location {
        Location { latitude, longitude, altitude, ..Location::default() }
    }

    #[test]
    fn test_tiles_per_axis_bounds() {
        assert_eq!(tiles_per_axis(0), Some(1));
        assert_eq!(tiles_per_axis(16), Some(65_536));
        assert_eq!(tiles_per_axis(MAX_ZOOM), Some(1 << 22));
        assert_eq!(tiles_per_axis(MAX_ZOOM + 1), None);
        assert_eq!(tiles_per_axis(64), None);
    }

    #[test]
    fn test_new_york_city_at_zoom_16() {
        let pos = TilePosition::from_lat_lon(40.7128, -74.0060, 16);
        let key = pos.tile_key();
        assert_eq!(key.x, 19295);
        assert_eq!(key.y, 24640);
        assert_eq!(key.zoom, 16);
    }

    #[test]
    fn test_origin_is_center_of_world() {
        let pos = TilePosition::from_lat_lon(0.0, 0.0, 1);
        assert!((pos.x - 1.0).abs() < 1e-9);
        assert!((pos.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_inverse_projection() {
        let pos = TilePosition { x: 36_400.5, y: 21_200.5, zoom: 16 };
        let (lat, lon) = pos.to_lat_lon();
        let back = TilePosition::from_lat_lon(lat, lon, 16);
        assert!((back.x - pos.x).abs() < 1e-6);
        assert!((back.y - pos.y).abs() < 1e-6);
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        let d = distance_between(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn test_distance_same_point_is_zero() {
        assert_eq!(distance_between(52.1, 21.0, 52.1, 21.0), 0.0);
    }

    #[test]
    fn test_meters_per_pixel_equator_zoom_0() {
        let mpp = meters_per_pixel(0.0, 0, 256);
        assert!((mpp - 156_543.03).abs() < 0.01, "got {mpp}");
    }

    #[test]
    fn test_linearly_weighted_average_favours_recent() {
        // weights 1, 2, 3 → (0 + 0 + 3*3) / 6
        assert_eq!(linearly_weighted_average(&[0.0, 0.0, 3.0]), 1.5);
        assert_eq!(linearly_weighted_average(&[]), 0.0);
    }

    #[test]
    fn test_slope_flat_and_stationary() {
        // 5 / 0 = inf, atan(inf) = π/2
        let history = vec![location(50.0, 20.0, 100.0), location(50.0, 20.0, 105.0)];
        let slope = calculate_slope(&history);
        assert!(slope.is_finite());

        let flat = vec![location(50.0, 20.0, 100.0), location(50.001, 20.0, 100.0)];
        assert_eq!(calculate_slope(&flat), 0.0);
    }

    #[test]
    fn test_slope_zero_over_zero_is_zero() {
        let history = vec![location(50.0, 20.0, 100.0), location(50.0, 20.0, 100.0)];
        assert_eq!(calculate_slope(&history), 0.0);
    }

    #[test]
    fn test_slope_climbing() {
        // ~111 m north, 11.1 m up ≈ 10% grade
        let history = vec![location(50.0, 20.0, 100.0), location(50.001, 20.0, 111.12)];
        let slope = calculate_slope(&history);
        assert!((slope.tan() - 0.1).abs() < 0.005, "got {}", slope.tan());
    }

    #[test]
    fn test_slope_needs_two_samples() {
        let history = vec![location(50.0, 20.0, 100.0)];
        assert_eq!(calculate_slope(&history), 0.0);
    }
}
