//! Domain models - wire codecs, geographic math and shared value types
//!
//! - `codec` - fixed-endianness byte conversion used by the protocol layer
//! - `geo` - Web Mercator tile projection, haversine distance, slope estimation
//! - `types` - `TileKey`, `Location`, route points and dirty flags

pub mod codec;
pub mod geo;
pub mod types;

pub use types::{ClusteredPoint, DirtyFlags, Location, LocationFix, PointOfInterest, TileKey, TourPoint};
