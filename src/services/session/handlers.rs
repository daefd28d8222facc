//! Inbound command handlers for the SessionController
//!
//! Routine protocol conditions end here: each handler logs and returns.

use super::{SessionController, SessionState};
use crate::domain::geo::{
    calculate_slope, distance_between, grade_percent, meters_per_second_to_km_per_hour, tiles_per_axis, TilePosition,
    MAX_ZOOM,
};
use crate::domain::types::{Location, LocationFix, PointOfInterest, TileKey, TourPoint};
use crate::io::display::DisplaySink;
use crate::io::protocol::{parse_inbound, request_tile_payload, InboundCommand, MessageType};
use crate::services::outbound::{FrameSink, Priority};
use crate::services::tile_store::{ChunkOutcome, TileError};
use smallvec::SmallVec;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Leading bytes of a malformed frame included in the warning
const PROTOCOL_ERROR_DUMP_BYTES: usize = 16;

impl<S: FrameSink, D: DisplaySink> SessionController<S, D> {
    /// Parse and dispatch one inbound frame
    pub fn on_frame(&mut self, frame: &[u8], now: Instant) {
        if !self.state.is_connected() {
            debug!(len = frame.len(), "frame_dropped_disconnected");
            self.metrics.record_frame_dropped();
            return;
        }
        self.metrics.record_frame_received();

        let command = match parse_inbound(frame) {
            Ok(command) => command,
            Err(e) => {
                let head = &frame[..frame.len().min(PROTOCOL_ERROR_DUMP_BYTES)];
                warn!(error = %e, len = frame.len(), head = %hex::encode(head), "protocol_error");
                self.metrics.record_frame_dropped();
                return;
            }
        };
        trace!(command = command.name(), "command_received");

        match command {
            InboundCommand::Ping => {
                self.outbound.send(MessageType::Pong, &[], Priority::High);
            }
            InboundCommand::SetLightness(percent) => self.handle_set_lightness(percent, now),
            InboundCommand::TakePhoto => {
                info!("photo_requested");
                self.photo.take_photo();
            }
            InboundCommand::LocationUpdate(fix) => self.update_location(&fix, now),
            InboundCommand::MapTileStart { key, byte_length } => self.handle_tile_start(key, byte_length),
            InboundCommand::MapTileChunk { index, data } => self.handle_tile_chunk(index, &data, now),
            InboundCommand::ClearTourData => {
                info!(points = self.tour.points().len(), "tour_cleared");
                self.tour.clear(None);
                self.dirty.map = true;
            }
            InboundCommand::TourStart { expected } => {
                info!(expected, "tour_started");
                self.tour.clear(Some(expected as usize));
                self.dirty.map = true;
            }
            InboundCommand::TourDataChunk(points) => self.handle_tour_points(points),
            InboundCommand::ConfirmReceived => self.outbound.on_confirmation(),
            InboundCommand::SetDistancePerPhoto(meters) => self.photo.set_distance_per_photo(meters),
            InboundCommand::PoiStart { expected } => {
                debug!(expected, "points_of_interest_started");
                self.tour.reset_points_of_interest(expected as usize);
                self.dirty.map = true;
            }
            InboundCommand::PoiDataChunk(points) => self.handle_points_of_interest(points),
        }
    }

    fn handle_set_lightness(&mut self, percent: u8, now: Instant) {
        info!(percent, "lightness_set");
        self.backlight = percent;
        self.last_activity = now;
        if self.state == SessionState::Inactive {
            self.state = SessionState::ConnectedActive;
        }
        self.display.set_backlight(percent);
    }

    /// Once a fix has set the zoom, tiles at any other zoom are answers to stale requests
    fn handle_tile_start(&mut self, key: TileKey, byte_length: u32) {
        if self.has_fix && key.zoom != self.zoom {
            warn!(key = %key, zoom = self.zoom, "tile_start_stale_zoom");
            self.tiles.abandon_in_flight();
            return;
        }
        match self.tiles.register_tile(key, byte_length) {
            Ok(zoom_changed) => {
                debug!(key = %key, byte_length, "tile_started");
                if zoom_changed {
                    self.dirty.map = true;
                }
            }
            Err(e) => warn!(error = %e, "tile_start_rejected"),
        }
    }

    fn handle_tile_chunk(&mut self, index: u16, data: &[u8], now: Instant) {
        match self.tiles.append_chunk(index, data) {
            Ok(ChunkOutcome::Pending { loaded, expected }) => {
                trace!(index, loaded, expected, "tile_chunk_appended");
            }
            Ok(ChunkOutcome::Finalized(key)) => {
                self.metrics.record_tile_completed();
                debug!(key = %key, resident = self.tiles.tile_count(), "tile_completed");
                self.dirty.map = true;
                self.register_activity(now);
            }
            Err(e @ TileError::Decode { .. }) => {
                self.metrics.record_tile_decode_failure();
                warn!(error = %e, "tile_decode_failed");
            }
            Err(e) => warn!(error = %e, index, "tile_chunk_rejected"),
        }
    }

    fn handle_tour_points(&mut self, points: Vec<TourPoint>) {
        trace!(count = points.len(), "tour_chunk");
        for point in points {
            self.tour.push_point(point);
        }
        self.dirty.map = true;
    }

    fn handle_points_of_interest(&mut self, points: Vec<PointOfInterest>) {
        trace!(count = points.len(), "points_of_interest_chunk");
        for point in points {
            self.tour.push_point_of_interest(point);
        }
        self.dirty.map = true;
    }

    /// Apply a fix: redraw flags, history, slope, photos and tile lookups
    pub fn update_location(&mut self, fix: &LocationFix, now: Instant) {
        let previous = self.location;
        let speed = meters_per_second_to_km_per_hour(fix.speed_mps);

        let moved_m = if self.has_fix {
            distance_between(previous.latitude, previous.longitude, fix.latitude, fix.longitude)
        } else {
            f64::INFINITY
        };
        let moved = moved_m > self.config.movement_threshold_m();

        if !self.has_fix || previous.speed.round() != speed.round() {
            self.dirty.speed = true;
        }
        if !self.has_fix || previous.heading.round() != fix.heading.round() {
            // heading-up map turns with the rider
            self.dirty.direction = true;
            self.dirty.map = true;
        }

        self.location = Location {
            latitude: fix.latitude,
            longitude: fix.longitude,
            speed,
            heading: fix.heading,
            altitude: fix.altitude,
            altitude_accuracy: fix.altitude_accuracy,
            horizontal_accuracy: fix.horizontal_accuracy,
            timestamp: fix.timestamp,
            previous_timestamp: previous.timestamp,
        };
        self.has_fix = true;

        if self.history.len() >= self.config.location_history() {
            self.history.pop_front();
        }
        self.history.push_back(self.location);

        let old_grade = grade_percent(self.slope).round();
        self.slope = calculate_slope(&self.history);
        if grade_percent(self.slope).round() != old_grade {
            self.dirty.slope = true;
        }

        self.apply_zoom(fix.zoom);

        if moved {
            trace!(moved_m = %format!("{moved_m:.1}"), "location_moved");
            self.dirty.map = true;
            self.register_activity(now);
        }

        self.photo.on_location(fix.latitude, fix.longitude);
        self.request_tiles();
    }

    /// Bring the tour and tile store to the fix's zoom
    ///
    /// The session's zoom is the only source; the tour and the store follow it.
    fn apply_zoom(&mut self, zoom: u8) {
        if zoom != self.zoom {
            debug!(from = self.zoom, to = zoom, "map_zoom_changed");
            self.zoom = zoom;
            self.dirty.map = true;
            self.outbound.discard_pending(|message_type, payload| {
                message_type == MessageType::RequestTile && payload[8] != zoom
            });
        }
        if self.tour.zoom() != zoom {
            self.tour.set_zoom(zoom);
        }
        if self.tiles.set_zoom(zoom) {
            self.dirty.map = true;
        }
    }

    /// Tiles covering the fix and its neighbourhood, nearest first
    pub(crate) fn tile_neighborhood(&self) -> SmallVec<[TileKey; 9]> {
        let Some(limit) = tiles_per_axis(self.zoom) else {
            warn!(zoom = self.zoom, max = MAX_ZOOM, "zoom_out_of_range");
            return SmallVec::new();
        };
        let center = TilePosition::from_lat_lon(self.location.latitude, self.location.longitude, self.zoom).tile_key();
        let radius = self.config.request_radius() as i64;

        let mut keys: SmallVec<[(i64, TileKey); 9]> = SmallVec::new();
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let x = center.x as i64 + dx;
                let y = center.y as i64 + dy;
                if x < 0 || y < 0 || x >= limit || y >= limit {
                    continue;
                }
                keys.push((dx.abs().max(dy.abs()), TileKey::new(x as u32, y as u32, self.zoom)));
            }
        }
        keys.sort_by_key(|(ring, _)| *ring);
        keys.into_iter().map(|(_, key)| key).collect()
    }

    /// Cache-or-request every missing tile around the fix
    fn request_tiles(&mut self) {
        for key in self.tile_neighborhood() {
            if self.tiles.contains(&key) || self.tiles.is_requested(&key) {
                continue;
            }
            if let Some(tile) = self.tiles.load_from_cache(key) {
                self.metrics.record_cache_lookup(true);
                self.tiles.insert(tile);
                debug!(key = %key, "tile_cache_hit");
                self.dirty.map = true;
                continue;
            }
            self.metrics.record_cache_lookup(false);
            self.tiles.mark_requested(key);
            self.outbound.send(MessageType::RequestTile, &request_tile_payload(key), Priority::Normal);
            self.metrics.record_tile_request();
            debug!(key = %key, "tile_requested");
        }
    }
}
