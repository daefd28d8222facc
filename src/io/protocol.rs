//! Phone link wire protocol
//!
//! Inbound frame: byte 0 = command id, remainder = little-endian payload.
//! Outbound frame: fixed 64 bytes
//! - bytes 0..2: signature 0x0D 0x25
//! - bytes 2..6: u32 LE sequence number
//! - byte 6: message type
//! - bytes 7..: payload, zero padded
//!
//! Every length check happens here before any `codec` call.

use crate::domain::codec::{f32_from_bytes, f64_from_bytes, u16_from_bytes, u32_from_bytes, u32_to_bytes, u64_from_bytes};
use crate::domain::geo::MAX_ZOOM;
use crate::domain::types::{LocationFix, PointOfInterest, TileKey, TourPoint};
use thiserror::Error;

/// Maximum tile bytes carried by one MAP_TILE_CHUNK frame
pub const TILE_CHUNK_SIZE: usize = 224;

// Inbound command ids
pub const CMD_PING: u8 = 1;
pub const CMD_SET_LIGHTNESS: u8 = 2;
pub const CMD_TAKE_PHOTO: u8 = 3;
pub const CMD_LOCATION_UPDATE: u8 = 4;
pub const CMD_MAP_TILE_START: u8 = 5;
pub const CMD_MAP_TILE_CHUNK: u8 = 6;
pub const CMD_CLEAR_TOUR_DATA: u8 = 7;
pub const CMD_TOUR_START: u8 = 8;
pub const CMD_TOUR_DATA_CHUNK: u8 = 9;
pub const CMD_CONFIRM_RECEIVED: u8 = 10;
pub const CMD_SET_DISTANCE_PER_PHOTO: u8 = 11;
pub const CMD_POI_START: u8 = 12;
pub const CMD_POI_DATA_CHUNK: u8 = 13;

// Outbound framing
pub const OUT_FRAME_LEN: usize = 64;
pub const OUT_SIGNATURE: [u8; 2] = [0x0D, 0x25];
pub const OUT_HEADER_LEN: usize = 7;
pub const OUT_PAYLOAD_MAX: usize = OUT_FRAME_LEN - OUT_HEADER_LEN;

const LOCATION_UPDATE_LEN: usize = 66;
const TILE_START_LEN: usize = 14;
const TOUR_POINT_LEN: usize = 10;
const POI_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown command id {0}")]
    UnknownCommand(u8),
    #[error("command {command} truncated: {len} bytes, need {needed}")]
    Truncated { command: u8, len: usize, needed: usize },
    #[error("command {command} zoom {zoom} out of range")]
    ZoomOutOfRange { command: u8, zoom: u8 },
}

/// Parsed inbound command
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    Ping,
    SetLightness(u8),
    TakePhoto,
    LocationUpdate(LocationFix),
    MapTileStart { key: TileKey, byte_length: u32 },
    MapTileChunk { index: u16, data: Vec<u8> },
    ClearTourData,
    TourStart { expected: u16 },
    TourDataChunk(Vec<TourPoint>),
    ConfirmReceived,
    SetDistancePerPhoto(u16),
    PoiStart { expected: u16 },
    PoiDataChunk(Vec<PointOfInterest>),
}

impl InboundCommand {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::SetLightness(_) => "set_lightness",
            Self::TakePhoto => "take_photo",
            Self::LocationUpdate(_) => "location_update",
            Self::MapTileStart { .. } => "map_tile_start",
            Self::MapTileChunk { .. } => "map_tile_chunk",
            Self::ClearTourData => "clear_tour_data",
            Self::TourStart { .. } => "tour_start",
            Self::TourDataChunk(_) => "tour_data_chunk",
            Self::ConfirmReceived => "confirm_received",
            Self::SetDistancePerPhoto(_) => "set_distance_per_photo",
            Self::PoiStart { .. } => "poi_start",
            Self::PoiDataChunk(_) => "poi_data_chunk",
        }
    }
}

#[inline]
fn require(frame: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if frame.len() < needed {
        return Err(ProtocolError::Truncated { command: frame[0], len: frame.len(), needed });
    }
    Ok(())
}

#[inline]
fn check_zoom(command: u8, zoom: u8) -> Result<u8, ProtocolError> {
    if zoom > MAX_ZOOM {
        return Err(ProtocolError::ZoomOutOfRange { command, zoom });
    }
    Ok(zoom)
}

/// Parse one inbound frame
pub fn parse_inbound(frame: &[u8]) -> Result<InboundCommand, ProtocolError> {
    let Some(&id) = frame.first() else {
        return Err(ProtocolError::Empty);
    };

    let command = match id {
        CMD_PING => InboundCommand::Ping,
        CMD_SET_LIGHTNESS => {
            require(frame, 2)?;
            InboundCommand::SetLightness(frame[1].min(100))
        }
        CMD_TAKE_PHOTO => InboundCommand::TakePhoto,
        CMD_LOCATION_UPDATE => {
            require(frame, LOCATION_UPDATE_LEN)?;
            let zoom = check_zoom(id, frame[65])?;
            let f = |offset: usize| f64_from_bytes(&frame[offset..], false);
            InboundCommand::LocationUpdate(LocationFix {
                latitude: f(1),
                longitude: f(9),
                speed_mps: f(17),
                heading: f(25),
                altitude: f(33),
                altitude_accuracy: f(41),
                horizontal_accuracy: f(49),
                timestamp: u64_from_bytes(&frame[57..], false),
                zoom,
            })
        }
        CMD_MAP_TILE_START => {
            require(frame, TILE_START_LEN)?;
            let x = u32_from_bytes(&frame[1..], false);
            let y = u32_from_bytes(&frame[5..], false);
            let zoom = check_zoom(id, frame[9])?;
            let byte_length = u32_from_bytes(&frame[10..], false);
            InboundCommand::MapTileStart { key: TileKey::new(x, y, zoom), byte_length }
        }
        CMD_MAP_TILE_CHUNK => {
            require(frame, 3)?;
            let index = u16_from_bytes(&frame[1..], false);
            let end = frame.len().min(3 + TILE_CHUNK_SIZE);
            InboundCommand::MapTileChunk { index, data: frame[3..end].to_vec() }
        }
        CMD_CLEAR_TOUR_DATA => InboundCommand::ClearTourData,
        CMD_TOUR_START => {
            require(frame, 3)?;
            InboundCommand::TourStart { expected: u16_from_bytes(&frame[1..], false) }
        }
        CMD_TOUR_DATA_CHUNK => {
            require(frame, 3)?;
            let count = u16_from_bytes(&frame[1..], false) as usize;
            require(frame, 3 + count * TOUR_POINT_LEN)?;
            let points = frame[3..3 + count * TOUR_POINT_LEN]
                .chunks_exact(TOUR_POINT_LEN)
                .map(|rec| TourPoint {
                    index: u16_from_bytes(rec, false),
                    latitude: f32_from_bytes(&rec[2..], false),
                    longitude: f32_from_bytes(&rec[6..], false),
                })
                .collect();
            InboundCommand::TourDataChunk(points)
        }
        CMD_CONFIRM_RECEIVED => InboundCommand::ConfirmReceived,
        CMD_SET_DISTANCE_PER_PHOTO => {
            require(frame, 3)?;
            InboundCommand::SetDistancePerPhoto(u16_from_bytes(&frame[1..], false))
        }
        CMD_POI_START => {
            require(frame, 3)?;
            InboundCommand::PoiStart { expected: u16_from_bytes(&frame[1..], false) }
        }
        CMD_POI_DATA_CHUNK => {
            require(frame, 3)?;
            let count = u16_from_bytes(&frame[1..], false) as usize;
            require(frame, 3 + count * POI_LEN)?;
            let points = frame[3..3 + count * POI_LEN]
                .chunks_exact(POI_LEN)
                .map(|rec| PointOfInterest {
                    latitude: f32_from_bytes(rec, false),
                    longitude: f32_from_bytes(&rec[4..], false),
                })
                .collect();
            InboundCommand::PoiDataChunk(points)
        }
        other => return Err(ProtocolError::UnknownCommand(other)),
    };
    Ok(command)
}

/// Outbound message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Pong = 1,
    RequestTile = 2,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pong => "pong",
            Self::RequestTile => "request_tile",
        }
    }
}

/// REQUEST_TILE payload: u32 x, u32 y, u8 z
pub fn request_tile_payload(key: TileKey) -> Vec<u8> {
    let mut payload = vec![0u8; 9];
    u32_to_bytes(key.x, &mut payload[0..], false);
    u32_to_bytes(key.y, &mut payload[4..], false);
    payload[8] = key.zoom;
    payload
}

/// Build a stamped outbound frame; payload beyond the frame capacity is cut
pub fn build_frame(sequence: u32, message_type: MessageType, payload: &[u8]) -> [u8; OUT_FRAME_LEN] {
    let mut frame = [0u8; OUT_FRAME_LEN];
    frame[..2].copy_from_slice(&OUT_SIGNATURE);
    u32_to_bytes(sequence, &mut frame[2..], false);
    frame[6] = message_type as u8;
    let len = payload.len().min(OUT_PAYLOAD_MAX);
    frame[OUT_HEADER_LEN..OUT_HEADER_LEN + len].copy_from_slice(&payload[..len]);
    frame
}

/// Encoders for the phone side of the protocol (feed tool, tests)
pub mod encode {
    use super::*;
    use crate::domain::codec::{f32_to_bytes, f64_to_bytes, u16_to_bytes, u64_to_bytes};

    pub fn ping() -> Vec<u8> {
        vec![CMD_PING]
    }

    pub fn set_lightness(percent: u8) -> Vec<u8> {
        vec![CMD_SET_LIGHTNESS, percent]
    }

    pub fn confirm_received() -> Vec<u8> {
        vec![CMD_CONFIRM_RECEIVED]
    }

    pub fn location_update(fix: &LocationFix) -> Vec<u8> {
        let mut frame = vec![0u8; LOCATION_UPDATE_LEN];
        frame[0] = CMD_LOCATION_UPDATE;
        let values = [
            fix.latitude,
            fix.longitude,
            fix.speed_mps,
            fix.heading,
            fix.altitude,
            fix.altitude_accuracy,
            fix.horizontal_accuracy,
        ];
        for (i, value) in values.iter().enumerate() {
            f64_to_bytes(*value, &mut frame[1 + i * 8..], false);
        }
        u64_to_bytes(fix.timestamp, &mut frame[57..], false);
        frame[65] = fix.zoom;
        frame
    }

    pub fn map_tile_start(key: TileKey, byte_length: u32) -> Vec<u8> {
        let mut frame = vec![0u8; TILE_START_LEN];
        frame[0] = CMD_MAP_TILE_START;
        u32_to_bytes(key.x, &mut frame[1..], false);
        u32_to_bytes(key.y, &mut frame[5..], false);
        frame[9] = key.zoom;
        u32_to_bytes(byte_length, &mut frame[10..], false);
        frame
    }

    /// Split `data` into MAP_TILE_CHUNK frames
    pub fn map_tile_chunks(data: &[u8]) -> Vec<Vec<u8>> {
        data.chunks(TILE_CHUNK_SIZE)
            .enumerate()
            .map(|(index, chunk)| {
                let mut frame = vec![0u8; 3 + chunk.len()];
                frame[0] = CMD_MAP_TILE_CHUNK;
                u16_to_bytes(index as u16, &mut frame[1..], false);
                frame[3..].copy_from_slice(chunk);
                frame
            })
            .collect()
    }

    pub fn tour_start(expected: u16) -> Vec<u8> {
        let mut frame = vec![CMD_TOUR_START, 0, 0];
        u16_to_bytes(expected, &mut frame[1..], false);
        frame
    }

    pub fn tour_data_chunk(points: &[TourPoint]) -> Vec<u8> {
        let mut frame = vec![0u8; 3 + points.len() * TOUR_POINT_LEN];
        frame[0] = CMD_TOUR_DATA_CHUNK;
        u16_to_bytes(points.len() as u16, &mut frame[1..], false);
        for (i, point) in points.iter().enumerate() {
            let rec = &mut frame[3 + i * TOUR_POINT_LEN..];
            u16_to_bytes(point.index, rec, false);
            f32_to_bytes(point.latitude, &mut rec[2..], false);
            f32_to_bytes(point.longitude, &mut rec[6..], false);
        }
        frame
    }

    pub fn poi_start(expected: u16) -> Vec<u8> {
        let mut frame = vec![CMD_POI_START, 0, 0];
        u16_to_bytes(expected, &mut frame[1..], false);
        frame
    }

    pub fn poi_data_chunk(points: &[PointOfInterest]) -> Vec<u8> {
        let mut frame = vec![0u8; 3 + points.len() * POI_LEN];
        frame[0] = CMD_POI_DATA_CHUNK;
        u16_to_bytes(points.len() as u16, &mut frame[1..], false);
        for (i, point) in points.iter().enumerate() {
            let rec = &mut frame[3 + i * POI_LEN..];
            f32_to_bytes(point.latitude, rec, false);
            f32_to_bytes(point.longitude, &mut rec[4..], false);
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_unknown() {
        assert_eq!(parse_inbound(&[]), Err(ProtocolError::Empty));
        assert_eq!(parse_inbound(&[0]), Err(ProtocolError::UnknownCommand(0)));
        assert_eq!(parse_inbound(&[42, 1, 2]), Err(ProtocolError::UnknownCommand(42)));
    }

    #[test]
    fn test_payloadless_commands() {
        assert_eq!(parse_inbound(&[CMD_PING]), Ok(InboundCommand::Ping));
        assert_eq!(parse_inbound(&[CMD_TAKE_PHOTO]), Ok(InboundCommand::TakePhoto));
        assert_eq!(parse_inbound(&[CMD_CLEAR_TOUR_DATA]), Ok(InboundCommand::ClearTourData));
        assert_eq!(parse_inbound(&[CMD_CONFIRM_RECEIVED]), Ok(InboundCommand::ConfirmReceived));
    }

    #[test]
    fn test_location_update_layout() {
        let fix = LocationFix {
            latitude: 52.2297,
            longitude: 21.0122,
            speed_mps: 5.5,
            heading: 270.0,
            altitude: 110.0,
            altitude_accuracy: 3.0,
            horizontal_accuracy: 8.0,
            timestamp: 1_700_000_000_123,
            zoom: 16,
        };
        let frame = encode::location_update(&fix);
        assert_eq!(frame.len(), 66);
        assert_eq!(&frame[1..9], &52.2297_f64.to_le_bytes());
        assert_eq!(frame[65], 16);
        assert_eq!(parse_inbound(&frame), Ok(InboundCommand::LocationUpdate(fix)));
    }

    #[test]
    fn test_location_update_truncated() {
        let frame = vec![CMD_LOCATION_UPDATE; 65];
        assert_eq!(
            parse_inbound(&frame),
            Err(ProtocolError::Truncated { command: CMD_LOCATION_UPDATE, len: 65, needed: 66 })
        );
    }

    #[test]
    fn test_zoom_above_max_is_rejected() {
        let fix = LocationFix { zoom: 64, ..LocationFix::default() };
        assert_eq!(
            parse_inbound(&encode::location_update(&fix)),
            Err(ProtocolError::ZoomOutOfRange { command: CMD_LOCATION_UPDATE, zoom: 64 })
        );
        let fix = LocationFix { zoom: MAX_ZOOM, ..LocationFix::default() };
        assert!(parse_inbound(&encode::location_update(&fix)).is_ok());

        let frame = encode::map_tile_start(TileKey::new(0, 0, MAX_ZOOM + 1), 10);
        assert_eq!(
            parse_inbound(&frame),
            Err(ProtocolError::ZoomOutOfRange { command: CMD_MAP_TILE_START, zoom: MAX_ZOOM + 1 })
        );
    }

    #[test]
    fn test_map_tile_start_layout() {
        let mut frame = vec![CMD_MAP_TILE_START];
        frame.extend_from_slice(&4551u32.to_le_bytes());
        frame.extend_from_slice(&2742u32.to_le_bytes());
        frame.push(13);
        frame.extend_from_slice(&1000u32.to_le_bytes());
        assert_eq!(
            parse_inbound(&frame),
            Ok(InboundCommand::MapTileStart { key: TileKey::new(4551, 2742, 13), byte_length: 1000 })
        );
        assert!(matches!(parse_inbound(&frame[..13]), Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn test_map_tile_chunk_caps_data() {
        let mut frame = vec![CMD_MAP_TILE_CHUNK, 2, 0];
        frame.extend(std::iter::repeat(0xAB).take(300));
        match parse_inbound(&frame) {
            Ok(InboundCommand::MapTileChunk { index, data }) => {
                assert_eq!(index, 2);
                assert_eq!(data.len(), TILE_CHUNK_SIZE);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tour_chunk_records() {
        let points = vec![
            TourPoint { index: 0, latitude: 52.0, longitude: 21.0 },
            TourPoint { index: 1, latitude: 52.001, longitude: 21.001 },
        ];
        let frame = encode::tour_data_chunk(&points);
        assert_eq!(frame.len(), 23);
        assert_eq!(parse_inbound(&frame), Ok(InboundCommand::TourDataChunk(points)));
    }

    #[test]
    fn test_tour_chunk_short_is_rejected_whole() {
        let points = vec![TourPoint { index: 7, latitude: 1.0, longitude: 2.0 }; 3];
        let frame = encode::tour_data_chunk(&points);
        let err = parse_inbound(&frame[..frame.len() - 1]).unwrap_err();
        assert_eq!(err, ProtocolError::Truncated { command: CMD_TOUR_DATA_CHUNK, len: 32, needed: 33 });
    }

    #[test]
    fn test_poi_chunk_records() {
        let pois = vec![PointOfInterest { latitude: 50.5, longitude: 19.25 }];
        let frame = encode::poi_data_chunk(&pois);
        assert_eq!(parse_inbound(&frame), Ok(InboundCommand::PoiDataChunk(pois)));
    }

    #[test]
    fn test_small_u16_commands() {
        assert_eq!(parse_inbound(&[CMD_SET_DISTANCE_PER_PHOTO, 0xF4, 0x01]), Ok(InboundCommand::SetDistancePerPhoto(500)));
        assert_eq!(parse_inbound(&[CMD_TOUR_START, 10, 0]), Ok(InboundCommand::TourStart { expected: 10 }));
        assert_eq!(parse_inbound(&[CMD_POI_START, 3, 0]), Ok(InboundCommand::PoiStart { expected: 3 }));
        assert_eq!(parse_inbound(&[CMD_SET_LIGHTNESS, 150]), Ok(InboundCommand::SetLightness(100)));
        assert!(parse_inbound(&[CMD_SET_LIGHTNESS]).is_err());
    }

    #[test]
    fn test_build_frame_layout() {
        let payload = request_tile_payload(TileKey::new(1, 2, 3));
        let frame = build_frame(0x0102_0304, MessageType::RequestTile, &payload);
        assert_eq!(frame.len(), OUT_FRAME_LEN);
        assert_eq!(&frame[..2], &OUT_SIGNATURE);
        assert_eq!(&frame[2..6], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(frame[6], 2);
        assert_eq!(&frame[7..16], &[1, 0, 0, 0, 2, 0, 0, 0, 3]);
        assert!(frame[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_chunk_encoder_splits_at_chunk_size() {
        let data = vec![1u8; 500];
        let chunks = encode::map_tile_chunks(&data);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 3 + 500 - 2 * TILE_CHUNK_SIZE);
        assert_eq!(&chunks[1][1..3], &[1, 0]);
    }
}
