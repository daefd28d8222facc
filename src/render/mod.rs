//! Rendering - map view and widget strip composed into panel blits
//!
//! - `canvas` - RGB565 drawing surface
//! - `map` - heading-up Web Mercator map with route, POIs and location marker
//! - `widgets` - speed, compass, slope and battery widgets
//! - `assets` - icon loading

pub mod assets;
pub mod canvas;
pub mod map;
pub mod widgets;

pub use assets::Assets;
pub use canvas::Canvas;
pub use map::MapScene;
pub use widgets::WidgetState;

use crate::domain::types::DirtyFlags;
use crate::io::display::DisplaySink;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::trace;
use widgets::Rect;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to allocate {bytes} byte frame buffer")]
    Allocation { bytes: usize },
}

/// Panel split: square map on top, widget strip below
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub width: u32,
    pub map_height: u32,
    pub strip_height: u32,
}

impl Layout {
    pub fn for_panel(width: u32, height: u32) -> Self {
        let map_height = width.min(height);
        Self { width, map_height, strip_height: height - map_height }
    }

    pub fn speed_area(&self) -> Rect {
        Rect::new(0, 0, self.width * 2 / 5, self.strip_height)
    }

    pub fn compass_area(&self) -> Rect {
        let speed = self.speed_area();
        Rect::new(speed.width, 0, self.width / 5, self.strip_height)
    }

    pub fn slope_area(&self) -> Rect {
        let compass = self.compass_area();
        Rect::new(compass.x + compass.width, 0, self.width * 7 / 30, self.strip_height)
    }

    pub fn battery_area(&self) -> Rect {
        let slope = self.slope_area();
        let x = slope.x + slope.width;
        Rect::new(x, 0, self.width.saturating_sub(x), self.strip_height)
    }
}

/// Draws dirty regions and pushes them to the display
pub struct Renderer {
    layout: Layout,
    assets: Assets,
    /// Persistent so untouched widgets keep their pixels
    strip: Option<Canvas>,
}

impl Renderer {
    pub fn new(layout: Layout, assets: Assets) -> Result<Self, RenderError> {
        let strip = if layout.strip_height > 0 {
            Some(Canvas::new(layout.width, layout.strip_height, widgets::STRIP_BACKGROUND)?)
        } else {
            None
        };
        Ok(Self { layout, assets, strip })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Render everything flagged in `dirty`
    ///
    /// On error nothing further is blitted and the panel keeps the previous frame.
    pub fn render(
        &mut self,
        dirty: DirtyFlags,
        scene: &MapScene<'_>,
        state: &WidgetState,
        sink: &dyn DisplaySink,
    ) -> Result<(), RenderError> {
        if dirty.map {
            let mut canvas = Canvas::new(self.layout.width, self.layout.map_height, map::BACKGROUND)?;
            map::render_map(&mut canvas, scene);
            sink.blit(0, 0, canvas.width(), canvas.height(), canvas.pixels());
            trace!(tiles = scene.tiles.tile_count(), route = scene.route.len(), "map_rendered");
        }

        let Some(strip) = self.strip.as_mut() else {
            return Ok(());
        };
        let top = self.layout.map_height;
        let mut regions: SmallVec<[Rect; 4]> = SmallVec::new();

        if dirty.speed {
            let area = self.layout.speed_area();
            widgets::draw_speed(strip, area, state.speed_kmh);
            regions.push(area);
        }
        if dirty.direction {
            let area = self.layout.compass_area();
            widgets::draw_compass(strip, area, &self.assets.arrow, state.heading);
            regions.push(area);
        }
        if dirty.slope {
            let area = self.layout.slope_area();
            widgets::draw_slope(strip, area, &self.assets.slope, state.slope);
            regions.push(area);
        }
        if dirty.battery {
            let area = self.layout.battery_area();
            widgets::draw_battery(strip, area, state.battery_percentage, state.overheated);
            regions.push(area);
        }

        for area in regions {
            let pixels = strip.copy_region(area.x, area.y, area.width, area.height);
            sink.blit(area.x, top + area.y, area.width, area.height, &pixels);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::types::Location;
    use crate::io::decoder::{DecodeError, DecodedImage, TileDecoder};
    use crate::services::tile_store::tests::MemoryCache;
    use crate::services::tile_store::TileStore;
    use assets::Icon;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum DisplayCall {
        Blit { x: u32, y: u32, width: u32, height: u32, len: usize },
        Backlight(u8),
    }

    /// Display sink that records every call
    #[derive(Default, Clone)]
    pub(crate) struct RecordingDisplay {
        pub calls: Arc<Mutex<Vec<DisplayCall>>>,
    }

    impl RecordingDisplay {
        pub fn take(&self) -> Vec<DisplayCall> {
            std::mem::take(&mut *self.calls.lock())
        }

        pub fn backlight_calls(&self) -> Vec<u8> {
            self.calls
                .lock()
                .iter()
                .filter_map(|c| match c {
                    DisplayCall::Backlight(p) => Some(*p),
                    _ => None,
                })
                .collect()
        }
    }

    impl DisplaySink for RecordingDisplay {
        fn blit(&self, x: u32, y: u32, width: u32, height: u32, pixels: &[u16]) {
            self.calls.lock().push(DisplayCall::Blit { x, y, width, height, len: pixels.len() });
        }

        fn set_backlight(&self, percent: u8) {
            self.calls.lock().push(DisplayCall::Backlight(percent));
        }
    }

    struct NoDecode;

    impl TileDecoder for NoDecode {
        fn decode(&self, _: &[u8]) -> Result<DecodedImage, DecodeError> {
            Err(DecodeError::Empty)
        }
    }

    pub(crate) fn test_assets() -> Assets {
        let icon = Icon { width: 3, height: 3, rgba: vec![255; 36] };
        Assets { arrow: icon.clone(), slope: icon }
    }

    #[test]
    fn test_layout_for_panel() {
        let layout = Layout::for_panel(240, 320);
        assert_eq!(layout.map_height, 240);
        assert_eq!(layout.strip_height, 80);
        assert_eq!(layout.speed_area(), Rect::new(0, 0, 96, 80));
        assert_eq!(layout.compass_area(), Rect::new(96, 0, 48, 80));
        assert_eq!(layout.slope_area(), Rect::new(144, 0, 56, 80));
        assert_eq!(layout.battery_area(), Rect::new(200, 0, 40, 80));

        let square = Layout::for_panel(240, 240);
        assert_eq!(square.strip_height, 0);
    }

    #[test]
    fn test_render_blits_only_dirty_regions() {
        let store = TileStore::new(Box::new(NoDecode), Box::new(MemoryCache::default()));
        let location = Location { latitude: 50.0, longitude: 20.0, ..Location::default() };
        let scene = MapScene { tiles: &store, route: &[], points_of_interest: &[], location: &location, zoom: 15 };
        let state = WidgetState { battery_percentage: 80, ..WidgetState::default() };
        let display = RecordingDisplay::default();
        let mut renderer = Renderer::new(Layout::for_panel(240, 320), test_assets()).unwrap();

        renderer.render(DirtyFlags::ALL, &scene, &state, &display).unwrap();
        let calls = display.take();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0], DisplayCall::Blit { x: 0, y: 0, width: 240, height: 240, len: 240 * 240 });

        let only_battery = DirtyFlags { battery: true, ..DirtyFlags::default() };
        renderer.render(only_battery, &scene, &state, &display).unwrap();
        assert_eq!(
            display.take(),
            vec![DisplayCall::Blit { x: 200, y: 240, width: 40, height: 80, len: 40 * 80 }]
        );

        renderer.render(DirtyFlags::default(), &scene, &state, &display).unwrap();
        assert!(display.take().is_empty());
    }
}
