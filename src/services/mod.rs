//! Services - session state and the subsystems it owns
//!
//! - `session` - connection state machine and command dispatch
//! - `tile_store` - chunked tile reassembly and cache lifecycle
//! - `tour_index` - route clustering and nearby-point queries
//! - `outbound` - acknowledgement-gated priority queue
//! - `photo` - distance-triggered photo capture
//! - `battery` - throttled battery and temperature monitoring

pub mod battery;
pub mod outbound;
pub mod photo;
pub mod session;
pub mod tile_store;
pub mod tour_index;

// Re-export commonly used types
pub use outbound::{FrameSink, OutboundQueue, Priority};
pub use session::{Peripherals, SessionController, SessionState};
pub use tile_store::TileStore;
pub use tour_index::TourIndex;
