//! Infrastructure - configuration and metrics
//!
//! - `config` - application configuration (TOML loading, defaults)
//! - `metrics` - lock-free metrics collection

pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use config::Config;
pub use metrics::Metrics;
