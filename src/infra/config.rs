//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_link_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_link_port")]
    pub port: u16,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { bind_address: default_link_bind_address(), port: default_link_port() }
    }
}

fn default_link_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_link_port() -> u16 {
    7070
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// Framebuffer device; empty runs headless (frames discarded)
    #[serde(default = "default_framebuffer")]
    pub framebuffer: String,
    /// sysfs brightness file; empty disables backlight control
    #[serde(default = "default_backlight")]
    pub backlight: String,
    #[serde(default = "default_max_brightness")]
    pub max_brightness: u32,
    #[serde(default = "default_display_width")]
    pub width: u32,
    #[serde(default = "default_display_height")]
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            framebuffer: default_framebuffer(),
            backlight: default_backlight(),
            max_brightness: default_max_brightness(),
            width: default_display_width(),
            height: default_display_height(),
        }
    }
}

fn default_framebuffer() -> String {
    "/dev/fb1".to_string()
}

fn default_backlight() -> String {
    "/sys/class/backlight/soc:backlight/brightness".to_string()
}

fn default_max_brightness() -> u32 {
    255
}

fn default_display_width() -> u32 {
    240
}

fn default_display_height() -> u32 {
    320
}

#[derive(Debug, Clone, Deserialize)]
pub struct TilesConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Chebyshev radius of tiles fetched around the current one
    #[serde(default = "default_request_radius")]
    pub request_radius: u32,
}

impl Default for TilesConfig {
    fn default() -> Self {
        Self { cache_dir: default_cache_dir(), request_radius: default_request_radius() }
    }
}

fn default_cache_dir() -> String {
    "cache/tiles".to_string()
}

fn default_request_radius() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
    #[serde(default = "default_location_history")]
    pub location_history: usize,
    #[serde(default = "default_render_interval_ms")]
    pub render_interval_ms: u64,
    #[serde(default = "default_movement_threshold_m")]
    pub movement_threshold_m: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            location_history: default_location_history(),
            render_interval_ms: default_render_interval_ms(),
            movement_threshold_m: default_movement_threshold_m(),
        }
    }
}

fn default_inactivity_timeout_ms() -> u64 {
    120_000
}

fn default_location_history() -> usize {
    10
}

fn default_render_interval_ms() -> u64 {
    16
}

fn default_movement_threshold_m() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_assets_dir")]
    pub dir: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self { dir: default_assets_dir() }
    }
}

fn default_assets_dir() -> String {
    "assets".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_photos_dir")]
    pub photos_dir: String,
    /// Write GPS EXIF tags with exiftool after capture
    #[serde(default = "default_geotag")]
    pub geotag: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { enabled: false, photos_dir: default_photos_dir(), geotag: default_geotag() }
    }
}

fn default_photos_dir() -> String {
    "photos".to_string()
}

fn default_geotag() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub tiles: TilesConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    link_bind_address: String,
    link_port: u16,
    framebuffer: String,
    backlight: String,
    max_brightness: u32,
    display_width: u32,
    display_height: u32,
    tile_cache_dir: PathBuf,
    request_radius: u32,
    inactivity_timeout_ms: u64,
    location_history: usize,
    render_interval_ms: u64,
    movement_threshold_m: f64,
    assets_dir: PathBuf,
    camera_enabled: bool,
    photos_dir: PathBuf,
    geotag: bool,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            link_bind_address: toml_config.link.bind_address,
            link_port: toml_config.link.port,
            framebuffer: toml_config.display.framebuffer,
            backlight: toml_config.display.backlight,
            max_brightness: toml_config.display.max_brightness,
            display_width: toml_config.display.width,
            display_height: toml_config.display.height,
            tile_cache_dir: PathBuf::from(toml_config.tiles.cache_dir),
            request_radius: toml_config.tiles.request_radius,
            inactivity_timeout_ms: toml_config.session.inactivity_timeout_ms,
            location_history: toml_config.session.location_history.max(2),
            render_interval_ms: toml_config.session.render_interval_ms.max(1),
            movement_threshold_m: toml_config.session.movement_threshold_m,
            assets_dir: PathBuf::from(toml_config.assets.dir),
            camera_enabled: toml_config.camera.enabled,
            photos_dir: PathBuf::from(toml_config.camera.photos_dir),
            geotag: toml_config.camera.geotag,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            config_file,
        }
    }

    /// Config file path: command line, then `CONFIG_FILE`, then the default
    pub fn resolve_config_path(cli: Option<&str>) -> String {
        if let Some(path) = cli {
            return path.to_string();
        }
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }
        DEFAULT_CONFIG_PATH.to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Resolve the path (see `resolve_config_path`), then `load_from_path`
    pub fn load(cli: Option<&str>) -> Self {
        Self::load_from_path(Self::resolve_config_path(cli))
    }

    pub fn link_bind_address(&self) -> &str {
        &self.link_bind_address
    }

    pub fn link_port(&self) -> u16 {
        self.link_port
    }

    pub fn framebuffer(&self) -> &str {
        &self.framebuffer
    }

    pub fn backlight(&self) -> &str {
        &self.backlight
    }

    pub fn max_brightness(&self) -> u32 {
        self.max_brightness
    }

    pub fn display_width(&self) -> u32 {
        self.display_width
    }

    pub fn display_height(&self) -> u32 {
        self.display_height
    }

    pub fn tile_cache_dir(&self) -> &Path {
        &self.tile_cache_dir
    }

    pub fn request_radius(&self) -> u32 {
        self.request_radius
    }

    pub fn inactivity_timeout_ms(&self) -> u64 {
        self.inactivity_timeout_ms
    }

    pub fn location_history(&self) -> usize {
        self.location_history
    }

    pub fn render_interval_ms(&self) -> u64 {
        self.render_interval_ms
    }

    pub fn movement_threshold_m(&self) -> f64 {
        self.movement_threshold_m
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    pub fn geotag(&self) -> bool {
        self.geotag
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shorten the inactivity timeout
    pub fn with_inactivity_timeout_ms(mut self, ms: u64) -> Self {
        self.inactivity_timeout_ms = ms;
        self
    }

    /// Builder method for tests to change the tile request neighbourhood
    pub fn with_request_radius(mut self, radius: u32) -> Self {
        self.request_radius = radius;
        self
    }

    /// Builder method for tests to point the tile cache at a temp dir
    pub fn with_tile_cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.tile_cache_dir = dir.into();
        self
    }
}
