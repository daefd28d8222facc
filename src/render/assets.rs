//! Widget icons, loaded once at startup

use anyhow::Context;
use std::path::Path;
use tracing::info;

pub const ARROW_ICON: &str = "arrow.png";
pub const SLOPE_ICON: &str = "slope.png";

/// Alpha at or below this is treated as transparent
const ALPHA_THRESHOLD: u8 = 127;

/// RGBA bitmap, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Icon {
    pub fn from_png(encoded: &[u8]) -> anyhow::Result<Self> {
        let img = image::load_from_memory(encoded)
            .context("Failed to decode icon")?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self { width, height, rgba: img.into_raw() })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read icon {}", path.display()))?;
        Self::from_png(&bytes).with_context(|| format!("Invalid icon {}", path.display()))
    }

    /// Opaque RGB at (x, y), `None` for transparent or out-of-range pixels
    #[inline]
    pub fn opaque_rgb(&self, x: i32, y: i32) -> Option<[u8; 3]> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let px = &self.rgba[i..i + 4];
        (px[3] > ALPHA_THRESHOLD).then(|| [px[0], px[1], px[2]])
    }
}

/// Icons the widget strip needs
#[derive(Debug, Clone)]
pub struct Assets {
    pub arrow: Icon,
    pub slope: Icon,
}

impl Assets {
    /// Missing or unreadable assets are a fatal startup error
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let arrow = Icon::load(&dir.join(ARROW_ICON))?;
        let slope = Icon::load(&dir.join(SLOPE_ICON))?;
        info!(dir = %dir.display(), arrow = ?(arrow.width, arrow.height), slope = ?(slope.width, slope.height), "assets_loaded");
        Ok(Self { arrow, slope })
    }
}
