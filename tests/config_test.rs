//! Integration tests for configuration loading

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use velomap::infra::Config;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[link]
bind_address = "0.0.0.0"
port = 7171

[display]
framebuffer = ""
backlight = ""
max_brightness = 100
width = 320
height = 480

[tiles]
cache_dir = "/var/cache/velomap"
request_radius = 2

[session]
inactivity_timeout_ms = 60000
location_history = 20
render_interval_ms = 33
movement_threshold_m = 1.5

[assets]
dir = "/usr/share/velomap"

[camera]
enabled = true
photos_dir = "/home/pi/photos"
geotag = false

[metrics]
interval_secs = 15
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.link_bind_address(), "0.0.0.0");
    assert_eq!(config.link_port(), 7171);
    assert_eq!(config.framebuffer(), "");
    assert_eq!(config.max_brightness(), 100);
    assert_eq!(config.display_width(), 320);
    assert_eq!(config.display_height(), 480);
    assert_eq!(config.tile_cache_dir(), Path::new("/var/cache/velomap"));
    assert_eq!(config.request_radius(), 2);
    assert_eq!(config.inactivity_timeout_ms(), 60_000);
    assert_eq!(config.location_history(), 20);
    assert_eq!(config.render_interval_ms(), 33);
    assert_eq!(config.movement_threshold_m(), 1.5);
    assert_eq!(config.assets_dir(), Path::new("/usr/share/velomap"));
    assert!(config.camera_enabled());
    assert_eq!(config.photos_dir(), Path::new("/home/pi/photos"));
    assert!(!config.geotag());
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.link_port(), 7070);
    assert_eq!(config.inactivity_timeout_ms(), 120_000);
    assert!(!config.camera_enabled());
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[link]\nport = \"not a number\"\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn test_dev_config_parses() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/dev.toml");
    let config = Config::from_file(path).unwrap();
    assert_eq!(config.link_port(), 7070);
    assert!(config.request_radius() >= 1);
}
