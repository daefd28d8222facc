//! velomap - on-device core of a bicycle navigation display
//!
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod render;
pub mod services;
