//! Route points clustered per map tile
//!
//! Points are kept in sender order and, once a zoom is known, bucketed by the
//! tile they project into. `nearby_points` unions the buckets of a square
//! tile neighbourhood and memoizes the last answer until the next mutation.

use crate::domain::geo::TilePosition;
use crate::domain::types::{ClusteredPoint, PointOfInterest, TourPoint};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NearbyKey {
    center_x: u32,
    center_y: u32,
    radius: u32,
    zoom: u8,
}

#[derive(Debug, Default)]
pub struct TourIndex {
    points: Vec<TourPoint>,
    points_of_interest: Vec<PointOfInterest>,
    clusters: FxHashMap<(u32, u32), Vec<ClusteredPoint>>,
    /// 0 until the first zoom arrives; no clustering before that
    zoom: u8,
    nearby_cache: Option<(NearbyKey, Arc<[ClusteredPoint]>)>,
    recompute_count: u64,
}

impl TourIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn points(&self) -> &[TourPoint] {
        &self.points
    }

    pub fn points_of_interest(&self) -> &[PointOfInterest] {
        &self.points_of_interest
    }

    /// Number of nearby-point recomputations so far
    pub fn recompute_count(&self) -> u64 {
        self.recompute_count
    }

    #[inline]
    fn project(&self, point: &TourPoint) -> ClusteredPoint {
        let pos = TilePosition::from_lat_lon(point.latitude as f64, point.longitude as f64, self.zoom);
        ClusteredPoint { index: point.index, tile_x: pos.x, tile_y: pos.y }
    }

    #[inline]
    fn cluster(&mut self, point: &TourPoint) {
        let projected = self.project(point);
        let cell = (projected.tile_x.max(0.0) as u32, projected.tile_y.max(0.0) as u32);
        self.clusters.entry(cell).or_default().push(projected);
    }

    /// Re-cluster every stored point at `zoom`
    pub fn set_zoom(&mut self, zoom: u8) {
        self.zoom = zoom;
        self.clusters.clear();
        self.nearby_cache = None;
        if zoom == 0 {
            return;
        }
        let points = std::mem::take(&mut self.points);
        for point in &points {
            self.cluster(point);
        }
        self.points = points;
        debug!(zoom, points = self.points.len(), clusters = self.clusters.len(), "tour_reclustered");
    }

    /// Drop all points and clusters, optionally reserving for `expected` points
    pub fn clear(&mut self, expected: Option<usize>) {
        self.points.clear();
        self.clusters.clear();
        self.nearby_cache = None;
        if let Some(expected) = expected {
            self.points.reserve(expected);
        }
    }

    pub fn push_point(&mut self, point: TourPoint) {
        if self.zoom != 0 {
            self.cluster(&point);
        }
        self.points.push(point);
        self.nearby_cache = None;
    }

    pub fn reset_points_of_interest(&mut self, expected: usize) {
        self.points_of_interest.clear();
        self.points_of_interest.reserve(expected);
    }

    pub fn push_point_of_interest(&mut self, point: PointOfInterest) {
        self.points_of_interest.push(point);
    }

    /// Points within `tile_radius` tiles (Chebyshev) of the tile covering
    /// (`latitude`, `longitude`), ascending by point index
    ///
    /// Repeated queries with the same center tile, radius and zoom return the
    /// same shared slice without recomputing.
    pub fn nearby_points(&mut self, latitude: f64, longitude: f64, tile_radius: u32) -> Arc<[ClusteredPoint]> {
        let center = TilePosition::from_lat_lon(latitude, longitude, self.zoom).tile_key();
        let key = NearbyKey { center_x: center.x, center_y: center.y, radius: tile_radius, zoom: self.zoom };

        if let Some((cached_key, points)) = &self.nearby_cache {
            if *cached_key == key {
                return points.clone();
            }
        }

        let mut nearby = Vec::new();
        let x_range = center.x.saturating_sub(tile_radius)..=center.x.saturating_add(tile_radius);
        for x in x_range {
            let y_range = center.y.saturating_sub(tile_radius)..=center.y.saturating_add(tile_radius);
            for y in y_range {
                if let Some(cluster) = self.clusters.get(&(x, y)) {
                    nearby.extend_from_slice(cluster);
                }
            }
        }
        nearby.sort_by_key(|p| p.index);

        let shared: Arc<[ClusteredPoint]> = nearby.into();
        self.recompute_count += 1;
        self.nearby_cache = Some((key, shared.clone()));
        shared
    }
}

/// Consecutive pairs that form real route segments (index differs by exactly 1)
pub fn connected_segments(points: &[ClusteredPoint]) -> impl Iterator<Item = (&ClusteredPoint, &ClusteredPoint)> {
    points
        .windows(2)
        .filter(|pair| pair[0].index.checked_add(1) == Some(pair[1].index))
        .map(|pair| (&pair[0], &pair[1]))
}
