//! RGB565 drawing surface

use super::RenderError;

/// Pack 8-bit RGB into the panel's RGB565 format
#[inline]
pub const fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

pub const BLACK: u16 = rgb565(0, 0, 0);
pub const WHITE: u16 = rgb565(255, 255, 255);

pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u16>,
}

impl Canvas {
    /// Allocate a `width` x `height` canvas filled with `background`
    pub fn new(width: u32, height: u32, background: u16) -> Result<Self, RenderError> {
        let len = width as usize * height as usize;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| RenderError::Allocation { bytes: len.saturating_mul(std::mem::size_of::<u16>()) })?;
        pixels.resize(len, background);
        Ok(Self { width, height, pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32) -> Option<u16> {
        self.index(x, y).map(|i| self.pixels[i])
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Out-of-bounds writes are ignored
    #[inline]
    pub fn set(&mut self, x: i32, y: i32, color: u16) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i] = color;
        }
    }

    /// Direct row-major write for full-surface passes
    #[inline]
    pub(crate) fn set_unchecked_index(&mut self, index: usize, color: u16) {
        self.pixels[index] = color;
    }

    /// Row-major copy of a sub-rectangle, clipped to the canvas
    pub fn copy_region(&self, x: u32, y: u32, width: u32, height: u32) -> Vec<u16> {
        let w = width.min(self.width.saturating_sub(x)) as usize;
        let h = height.min(self.height.saturating_sub(y));
        let mut out = Vec::with_capacity(w * h as usize);
        for row in y..y + h {
            let start = row as usize * self.width as usize + x as usize;
            out.extend_from_slice(&self.pixels[start..start + w]);
        }
        out
    }

    pub fn fill(&mut self, color: u16) {
        self.pixels.fill(color);
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: u16) {
        for yy in y..y + height as i32 {
            for xx in x..x + width as i32 {
                self.set(xx, yy, color);
            }
        }
    }

    pub fn stroke_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: u16) {
        let (w, h) = (width as i32, height as i32);
        for xx in x..x + w {
            self.set(xx, y, color);
            self.set(xx, y + h - 1, color);
        }
        for yy in y..y + h {
            self.set(x, yy, color);
            self.set(x + w - 1, yy, color);
        }
    }

    /// Bresenham line; `thickness` > 1 stamps a square brush
    pub fn line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u16, thickness: u32) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);
        let brush = thickness.max(1) as i32;
        let offset = (brush - 1) / 2;

        loop {
            if brush == 1 {
                self.set(x, y, color);
            } else {
                self.fill_rect(x - offset, y - offset, brush as u32, brush as u32, color);
            }
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    pub fn fill_circle(&mut self, cx: i32, cy: i32, radius: i32, color: u16) {
        let r2 = radius * radius;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= r2 {
                    self.set(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// One-pixel circle outline (midpoint algorithm)
    pub fn circle(&mut self, cx: i32, cy: i32, radius: i32, color: u16) {
        if radius <= 0 {
            self.set(cx, cy, color);
            return;
        }
        let (mut x, mut y) = (radius, 0);
        let mut err = 1 - radius;
        while x >= y {
            for (px, py) in [(x, y), (y, x), (-y, x), (-x, y), (-x, -y), (-y, -x), (y, -x), (x, -y)] {
                self.set(cx + px, cy + py, color);
            }
            y += 1;
            if err < 0 {
                err += 2 * y + 1;
            } else {
                x -= 1;
                err += 2 * (y - x) + 1;
            }
        }
    }
}
