//! Heading-up map view
//!
//! Screen space is y-down with the current location at the canvas center.
//! A screen offset maps to a tile-space offset by rotating it by the heading;
//! tile space maps back to the screen by rotating by the negated heading.

use super::canvas::{rgb565, Canvas, BLACK};
use crate::domain::geo::{degrees_to_radians, meters_per_pixel, TilePosition};
use crate::domain::types::{ClusteredPoint, Location, PointOfInterest, TileKey};
use crate::io::decoder::DecodedImage;
use crate::services::tile_store::TileStore;
use crate::services::tour_index::connected_segments;

pub const DEFAULT_TILE_SIZE: u32 = 256;

pub const BACKGROUND: u16 = rgb565(38, 50, 56);
pub const ROUTE_COLOR: u16 = rgb565(255, 167, 38);
pub const ROUTE_THICKNESS: u32 = 2;
pub const LOCATION_OUTER: u16 = rgb565(0, 96, 100);
pub const LOCATION_OUTER_RADIUS: i32 = 6;
pub const LOCATION_INNER_RADIUS: i32 = 3;
pub const ACCURACY_RING: u16 = rgb565(0, 150, 136);
pub const POI_COLOR: u16 = rgb565(3, 169, 244);
pub const POI_RADIUS: i32 = 4;

pub struct MapScene<'a> {
    pub tiles: &'a TileStore,
    /// Nearby route points, ascending by index
    pub route: &'a [ClusteredPoint],
    pub points_of_interest: &'a [PointOfInterest],
    pub location: &'a Location,
    pub zoom: u8,
}

/// Rotate (`x`, `y`) by `angle` radians around (`pivot_x`, `pivot_y`)
#[inline]
pub fn rotate_around_pivot(x: f64, y: f64, pivot_x: f64, pivot_y: f64, angle: f64) -> (f64, f64) {
    let (sin, cos) = angle.sin_cos();
    let (dx, dy) = (x - pivot_x, y - pivot_y);
    (pivot_x + dx * cos - dy * sin, pivot_y + dx * sin + dy * cos)
}

/// False when both endpoints lie beyond the same canvas edge
#[inline]
pub fn segment_may_be_visible(a: (f64, f64), b: (f64, f64), width: f64, height: f64) -> bool {
    !((a.0 < 0.0 && b.0 < 0.0)
        || (a.0 >= width && b.0 >= width)
        || (a.1 < 0.0 && b.1 < 0.0)
        || (a.1 >= height && b.1 >= height))
}

/// Pixel size of one tile; taken from the resident tiles
fn nominal_tile_size(tiles: &TileStore) -> (f64, f64) {
    tiles
        .tiles()
        .find_map(|t| t.image())
        .map(|img| (img.width.max(1) as f64, img.height.max(1) as f64))
        .unwrap_or((DEFAULT_TILE_SIZE as f64, DEFAULT_TILE_SIZE as f64))
}

pub fn render_map(canvas: &mut Canvas, scene: &MapScene<'_>) {
    let width = canvas.width();
    let height = canvas.height();
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;
    let (tile_w, tile_h) = nominal_tile_size(scene.tiles);
    let loc = TilePosition::from_lat_lon(scene.location.latitude, scene.location.longitude, scene.zoom);
    let heading = degrees_to_radians(scene.location.heading);

    draw_tiles(canvas, scene, loc, heading, tile_w, tile_h);

    let to_screen = |tile_x: f64, tile_y: f64| -> (f64, f64) {
        let dx = (tile_x - loc.x) * tile_w;
        let dy = (tile_y - loc.y) * tile_h;
        let (rx, ry) = rotate_around_pivot(dx, dy, 0.0, 0.0, -heading);
        (cx + rx, cy + ry)
    };

    for (a, b) in connected_segments(scene.route) {
        let pa = to_screen(a.tile_x, a.tile_y);
        let pb = to_screen(b.tile_x, b.tile_y);
        if !segment_may_be_visible(pa, pb, width as f64, height as f64) {
            continue;
        }
        canvas.line(
            pa.0.round() as i32,
            pa.1.round() as i32,
            pb.0.round() as i32,
            pb.1.round() as i32,
            ROUTE_COLOR,
            ROUTE_THICKNESS,
        );
    }

    for poi in scene.points_of_interest {
        let pos = TilePosition::from_lat_lon(poi.latitude as f64, poi.longitude as f64, scene.zoom);
        let (x, y) = to_screen(pos.x, pos.y);
        let r = POI_RADIUS as f64;
        if x < -r || y < -r || x >= width as f64 + r || y >= height as f64 + r {
            continue;
        }
        let (x, y) = (x.round() as i32, y.round() as i32);
        canvas.fill_circle(x, y, POI_RADIUS, POI_COLOR);
        canvas.circle(x, y, POI_RADIUS, BLACK);
    }

    let ring = accuracy_ring_radius(scene.location, scene.zoom, tile_w as u32, width);
    if ring > LOCATION_OUTER_RADIUS {
        canvas.circle(cx as i32, cy as i32, ring, ACCURACY_RING);
    }
    canvas.fill_circle(cx as i32, cy as i32, LOCATION_OUTER_RADIUS, LOCATION_OUTER);
    canvas.fill_circle(cx as i32, cy as i32, LOCATION_INNER_RADIUS, BLACK);
}

/// GPS accuracy ring radius in pixels, at most half the canvas width
pub fn accuracy_ring_radius(location: &Location, zoom: u8, tile_width_px: u32, canvas_width: u32) -> i32 {
    let mpp = meters_per_pixel(location.latitude, zoom, tile_width_px);
    if mpp.is_nan() || mpp <= 0.0 || !location.horizontal_accuracy.is_finite() {
        return 0;
    }
    let radius = (location.horizontal_accuracy / mpp).max(0.0);
    radius.min(canvas_width as f64 / 2.0) as i32
}

fn draw_tiles(canvas: &mut Canvas, scene: &MapScene<'_>, loc: TilePosition, heading: f64, tile_w: f64, tile_h: f64) {
    let width = canvas.width();
    let height = canvas.height();
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;
    let (sin, cos) = heading.sin_cos();

    // consecutive pixels mostly hit the same tile
    let mut last: Option<(TileKey, Option<&DecodedImage>)> = None;

    for py in 0..height {
        let sy = (py as f64 - cy) / tile_h;
        for px in 0..width {
            let sx = (px as f64 - cx) / tile_w;
            let wx = loc.x + sx * cos - sy * sin;
            let wy = loc.y + sx * sin + sy * cos;
            if wx < 0.0 || wy < 0.0 {
                continue;
            }
            let key = TileKey::new(wx as u32, wy as u32, scene.zoom);
            let image = match last {
                Some((k, img)) if k == key => img,
                _ => {
                    let img = scene.tiles.get(&key).and_then(|t| t.image());
                    last = Some((key, img));
                    img
                }
            };
            let Some(image) = image else {
                continue;
            };
            let col = ((wx.fract() * image.width as f64) as u32).min(image.width.saturating_sub(1));
            let row = ((wy.fract() * image.height as f64) as u32).min(image.height.saturating_sub(1));
            let [r, g, b] = image.pixel(row, col);
            canvas.set_unchecked_index((py * width + px) as usize, rgb565(r, g, b));
        }
    }
}
