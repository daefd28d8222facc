//! IO modules - external system interfaces
//!
//! This module contains every device and transport boundary:
//! - `protocol` - inbound command parsing and outbound frame building
//! - `link` - TCP bridge to the phone link, one peer at a time
//! - `decoder` - PNG/JPEG tile decoding
//! - `tile_cache` - on-disk tile cache with a write-behind worker
//! - `display` - framebuffer blits and backlight worker
//! - `camera` - libcamera capture with optional GPS tagging
//! - `battery` - battery and SoC temperature probes

pub mod battery;
pub mod camera;
pub mod decoder;
pub mod display;
pub mod link;
pub mod protocol;
pub mod tile_cache;

// Re-export commonly used types
pub use display::{create_display_worker, DisplayHandle, DisplaySink, FramebufferDisplay};
pub use link::{LinkEvent, LinkListener, LinkSender};
pub use protocol::{InboundCommand, ProtocolError};
pub use tile_cache::{create_cache_writer, DiskTileCache};
