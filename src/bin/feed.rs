//! velomap-feed - phone-side link driver for development
//!
//! Connects to a running velomap link listener and plays the phone's part:
//! sends a location fix, an optional straight-line tour and POIs, and answers
//! every device frame with CONFIRM_RECEIVED. REQUEST_TILE frames are served
//! from a tile directory laid out like the device cache
//! (`<dir>/<zoom>/<x>_<y>_<zoom>.png`) when one is given.
//!
//! Usage:
//!   cargo run --bin velomap-feed -- --lat 50.06 --lon 19.94 --zoom 16
//!   cargo run --bin velomap-feed -- --tiles cache/tiles --tour-points 200 --heading 90

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use velomap::domain::codec::u32_from_bytes;
use velomap::domain::types::{LocationFix, PointOfInterest, TileKey, TourPoint};
use velomap::io::link::{read_frame, write_frame};
use velomap::io::protocol::{encode, MessageType, OUT_HEADER_LEN, OUT_SIGNATURE};
use velomap::io::DiskTileCache;

/// Tour points per TOUR_DATA_CHUNK frame
const TOUR_POINTS_PER_CHUNK: usize = 20;

/// Spacing of generated tour points along the heading (degrees of arc)
const TOUR_STEP_DEG: f64 = 0.0002;

#[derive(Parser, Debug)]
#[command(name = "velomap-feed", version)]
#[command(about = "Drive a velomap link with synthetic phone traffic")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = 7070)]
    port: u16,

    #[arg(long, default_value_t = 50.0614)]
    lat: f64,

    #[arg(long, default_value_t = 19.9366)]
    lon: f64,

    #[arg(short, long, default_value_t = 16)]
    zoom: u8,

    /// Degrees clockwise from north
    #[arg(long, default_value_t = 0.0)]
    heading: f64,

    /// Meters per second
    #[arg(long, default_value_t = 5.0)]
    speed: f64,

    /// Backlight level sent after connecting
    #[arg(long)]
    lightness: Option<u8>,

    /// Directory to answer REQUEST_TILE from
    #[arg(long)]
    tiles: Option<PathBuf>,

    /// Generate a straight tour of this many points ahead of the rider
    #[arg(long, default_value_t = 0)]
    tour_points: u16,

    /// Place a point of interest at the end of the generated tour
    #[arg(long)]
    poi: bool,

    /// Seconds to keep serving requests before disconnecting
    #[arg(long, default_value_t = 30)]
    duration_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let stream = TcpStream::connect(&addr).await.with_context(|| format!("Failed to connect to {addr}"))?;
    stream.set_nodelay(true)?;
    info!(addr = %addr, "feed_connected");

    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                warn!(error = %e, "feed_write_failed");
                return;
            }
        }
    });

    tx.send(encode::ping()).await?;
    if let Some(percent) = args.lightness {
        tx.send(encode::set_lightness(percent)).await?;
    }
    let fix = LocationFix {
        latitude: args.lat,
        longitude: args.lon,
        speed_mps: args.speed,
        heading: args.heading,
        altitude: 0.0,
        altitude_accuracy: 5.0,
        horizontal_accuracy: 8.0,
        timestamp: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64,
        zoom: args.zoom,
    };
    tx.send(encode::location_update(&fix)).await?;
    info!(lat = args.lat, lon = args.lon, zoom = args.zoom, "feed_location_sent");

    if args.tour_points > 0 {
        let points = straight_tour(args.lat, args.lon, args.heading, args.tour_points);
        tx.send(encode::tour_start(args.tour_points)).await?;
        for chunk in points.chunks(TOUR_POINTS_PER_CHUNK) {
            tx.send(encode::tour_data_chunk(chunk)).await?;
        }
        info!(points = points.len(), "feed_tour_sent");

        if args.poi {
            if let Some(last) = points.last() {
                let poi = PointOfInterest { latitude: last.latitude, longitude: last.longitude };
                tx.send(encode::poi_start(1)).await?;
                tx.send(encode::poi_data_chunk(&[poi])).await?;
            }
        }
    }

    let cache = args.tiles.map(DiskTileCache::new);
    let serve = async {
        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(frame) => frame,
                Err(e) => {
                    info!(error = %e, "feed_link_closed");
                    return;
                }
            };
            let Some((sequence, message_type, payload)) = split_device_frame(&frame) else {
                warn!(len = frame.len(), frame = %hex::encode(&frame), "feed_unrecognized_frame");
                continue;
            };
            debug!(sequence, message_type, payload = %hex::encode(payload), "feed_frame_received");

            if message_type == MessageType::RequestTile as u8 && payload.len() >= 9 {
                let key = TileKey::new(
                    u32_from_bytes(payload, false),
                    u32_from_bytes(&payload[4..], false),
                    payload[8],
                );
                info!(sequence, key = %key, "feed_tile_requested");
                if let Some(cache) = &cache {
                    if let Err(e) = send_tile(&tx, cache, key).await {
                        warn!(key = %key, error = %format!("{e:#}"), "feed_tile_unavailable");
                    }
                }
            } else if message_type == MessageType::Pong as u8 {
                info!(sequence, "feed_pong");
            }

            if tx.send(encode::confirm_received()).await.is_err() {
                return;
            }
        }
    };

    if tokio::time::timeout(Duration::from_secs(args.duration_secs), serve).await.is_err() {
        info!(duration_secs = args.duration_secs, "feed_finished");
    }
    writer_task.abort();
    Ok(())
}

/// Split a device frame into (sequence, message type, payload)
fn split_device_frame(frame: &[u8]) -> Option<(u32, u8, &[u8])> {
    if frame.len() < OUT_HEADER_LEN || frame[..2] != OUT_SIGNATURE {
        return None;
    }
    Some((u32_from_bytes(&frame[2..], false), frame[6], &frame[OUT_HEADER_LEN..]))
}

async fn send_tile(tx: &mpsc::Sender<Vec<u8>>, cache: &DiskTileCache, key: TileKey) -> anyhow::Result<()> {
    let path = cache.path_for(key);
    let data = tokio::fs::read(&path).await.with_context(|| format!("Failed to read {}", path.display()))?;
    tx.send(encode::map_tile_start(key, data.len() as u32)).await?;
    for chunk in encode::map_tile_chunks(&data) {
        tx.send(chunk).await?;
    }
    info!(key = %key, bytes = data.len(), "feed_tile_sent");
    Ok(())
}

/// Evenly spaced points starting at the rider and running along `heading`
fn straight_tour(lat: f64, lon: f64, heading: f64, count: u16) -> Vec<TourPoint> {
    let (sin, cos) = heading.to_radians().sin_cos();
    (0..count)
        .map(|index| {
            let step = index as f64 * TOUR_STEP_DEG;
            TourPoint {
                index,
                latitude: (lat + step * cos) as f32,
                longitude: (lon + step * sin / lat.to_radians().cos()) as f32,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use velomap::domain::geo::TilePosition;
    use velomap::io::protocol::build_frame;

    #[test]
    fn test_split_device_frame() {
        let frame = build_frame(7, MessageType::Pong, &[]);
        let (sequence, message_type, payload) = split_device_frame(&frame).unwrap();
        assert_eq!(sequence, 7);
        assert_eq!(message_type, MessageType::Pong as u8);
        assert_eq!(payload.len(), frame.len() - OUT_HEADER_LEN);

        assert!(split_device_frame(&[0x00, 0x01, 0, 0, 0, 0, 1]).is_none());
        assert!(split_device_frame(&[0x0D]).is_none());
    }

    #[test]
    fn test_straight_tour_heads_north() {
        let points = straight_tour(50.0, 20.0, 0.0, 3);
        assert_eq!(points.len(), 3);
        assert_eq!(points[2].index, 2);
        assert!(points[2].latitude > points[0].latitude);
        assert!((points[2].longitude - points[0].longitude).abs() < 1e-6);
        // tile projection of the start stays on the rider's tile
        let start = TilePosition::from_lat_lon(points[0].latitude as f64, points[0].longitude as f64, 16);
        assert_eq!(start.tile_key(), TilePosition::from_lat_lon(50.0, 20.0, 16).tile_key());
    }
}
