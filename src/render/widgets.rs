//! Widget strip: speed, compass arrow, slope indicator, battery gauge

use super::assets::Icon;
use super::canvas::{rgb565, Canvas, BLACK, WHITE};
use super::map::rotate_around_pivot;
use crate::domain::geo::grade_percent;

pub const STRIP_BACKGROUND: u16 = BLACK;
pub const SLOPE_GENTLE: u16 = rgb565(76, 175, 80);
pub const SLOPE_MODERATE: u16 = rgb565(255, 152, 0);
pub const SLOPE_STEEP: u16 = rgb565(244, 67, 54);
pub const BATTERY_OK: u16 = rgb565(76, 175, 80);
pub const BATTERY_ALERT: u16 = rgb565(244, 67, 54);
pub const BATTERY_LOW_PERCENT: u8 = 20;

/// Segment bits a..g (bit 0 = a) for digits 0-9
const SEVEN_SEGMENT: [u8; 10] = [0x3F, 0x06, 0x5B, 0x4F, 0x66, 0x6D, 0x7D, 0x07, 0x7F, 0x6F];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    fn center(&self) -> (i32, i32) {
        ((self.x + self.width / 2) as i32, (self.y + self.height / 2) as i32)
    }
}

/// Numeric inputs of the strip
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WidgetState {
    pub speed_kmh: f64,
    /// Degrees, 0 = north, clockwise
    pub heading: f64,
    /// Radians, positive uphill
    pub slope: f64,
    pub battery_percentage: u8,
    pub overheated: bool,
}

#[derive(Debug, Clone, Copy)]
struct DigitStyle {
    width: u32,
    height: u32,
    thickness: u32,
    gap: u32,
}

fn draw_digit(canvas: &mut Canvas, x: i32, y: i32, digit: u8, style: DigitStyle, color: u16) {
    let bits = SEVEN_SEGMENT[(digit % 10) as usize];
    let DigitStyle { width: w, height: h, thickness: t, .. } = style;
    let half = h / 2;
    let segments = [
        (x, y, w, t),
        (x + (w - t) as i32, y, t, half),
        (x + (w - t) as i32, y + half as i32, t, h - half),
        (x, y + (h - t) as i32, w, t),
        (x, y + half as i32, t, h - half),
        (x, y, t, half),
        (x, y + half as i32 - (t / 2) as i32, w, t),
    ];
    for (i, (sx, sy, sw, sh)) in segments.into_iter().enumerate() {
        if bits & (1 << i) != 0 {
            canvas.fill_rect(sx, sy, sw, sh, color);
        }
    }
}

/// Draw `value` left-aligned starting at (x, y); returns the x after the last digit
fn draw_number(canvas: &mut Canvas, x: i32, y: i32, value: u32, style: DigitStyle, color: u16) -> i32 {
    let text = value.to_string();
    let mut cursor = x;
    for b in text.bytes() {
        draw_digit(canvas, cursor, y, b - b'0', style, color);
        cursor += (style.width + style.gap) as i32;
    }
    cursor
}

/// Rounded km/h, large seven-segment digits narrowed to fit `area`
pub fn draw_speed(canvas: &mut Canvas, area: Rect, speed_kmh: f64) {
    const MARGIN: u32 = 8;
    const GAP: u32 = 6;

    canvas.fill_rect(area.x as i32, area.y as i32, area.width, area.height, STRIP_BACKGROUND);
    let value = if speed_kmh.is_finite() { speed_kmh.round().clamp(0.0, 999.0) as u32 } else { 0 };
    let digits = value.checked_ilog10().unwrap_or(0) + 1;

    let height = area.height.saturating_sub(2 * MARGIN).max(8);
    let room = area.width.saturating_sub(2 * MARGIN).saturating_sub(GAP * (digits - 1));
    let width = (height / 2).min(room / digits).max(2);
    let thickness = (height / 10).max(2).min(width / 2);
    let style = DigitStyle { width, height, thickness, gap: GAP };
    draw_number(canvas, (area.x + MARGIN) as i32, (area.y + MARGIN) as i32, value, style, WHITE);
}

/// Stamp `icon` rotated by `angle` radians around the center of `area`
///
/// Opaque icon pixels use `tint` when given, their own color otherwise.
pub fn draw_rotated_icon(canvas: &mut Canvas, area: Rect, icon: &Icon, angle: f64, tint: Option<u16>) {
    let (cx, cy) = area.center();
    let icon_cx = (icon.width as f64 - 1.0) / 2.0;
    let icon_cy = (icon.height as f64 - 1.0) / 2.0;
    let reach = ((icon.width.max(icon.height) as f64) * std::f64::consts::SQRT_2 / 2.0).ceil() as i32 + 1;

    for dy in -reach..=reach {
        for dx in -reach..=reach {
            let (px, py) = (cx + dx, cy + dy);
            if px < area.x as i32
                || py < area.y as i32
                || px >= (area.x + area.width) as i32
                || py >= (area.y + area.height) as i32
            {
                continue;
            }
            let (sx, sy) = rotate_around_pivot(dx as f64, dy as f64, 0.0, 0.0, -angle);
            let src_x = (icon_cx + sx).round() as i32;
            let src_y = (icon_cy + sy).round() as i32;
            if let Some([r, g, b]) = icon.opaque_rgb(src_x, src_y) {
                canvas.set(px, py, tint.unwrap_or_else(|| rgb565(r, g, b)));
            }
        }
    }
}

/// Arrow pointing north on the heading-up map
pub fn draw_compass(canvas: &mut Canvas, area: Rect, arrow: &Icon, heading: f64) {
    canvas.fill_rect(area.x as i32, area.y as i32, area.width, area.height, STRIP_BACKGROUND);
    draw_rotated_icon(canvas, area, arrow, -heading.to_radians(), None);
}

pub fn slope_color(percent: f64) -> u16 {
    let p = percent.abs();
    if p < 3.0 {
        SLOPE_GENTLE
    } else if p < 8.0 {
        SLOPE_MODERATE
    } else {
        SLOPE_STEEP
    }
}

/// Tilted, tinted slope icon with the grade in small digits underneath
pub fn draw_slope(canvas: &mut Canvas, area: Rect, icon: &Icon, slope: f64) {
    canvas.fill_rect(area.x as i32, area.y as i32, area.width, area.height, STRIP_BACKGROUND);
    let slope = if slope.is_finite() { slope } else { 0.0 };
    let percent = grade_percent(slope);
    let color = slope_color(percent);

    let icon_area = Rect::new(area.x, area.y, area.width, area.height.saturating_sub(22));
    // uphill tilts the icon counter-clockwise
    draw_rotated_icon(canvas, icon_area, icon, -slope, Some(color));

    let style = DigitStyle { width: 8, height: 14, thickness: 2, gap: 3 };
    let value = percent.abs().round().min(99.0) as u32;
    let digits = value.to_string().len() as u32;
    let text_width = digits * (style.width + style.gap) - style.gap;
    let x = area.x as i32 + (area.width.saturating_sub(text_width) / 2) as i32;
    let y = (area.y + area.height).saturating_sub(style.height + 4) as i32;
    draw_number(canvas, x, y, value, style, color);
}

/// Outline with a terminal nub, filled proportionally to `percentage`
pub fn draw_battery(canvas: &mut Canvas, area: Rect, percentage: u8, overheated: bool) {
    canvas.fill_rect(area.x as i32, area.y as i32, area.width, area.height, STRIP_BACKGROUND);
    let body_w = area.width.saturating_sub(10).max(8);
    let body_h = (area.height / 2).max(6);
    let x = area.x as i32 + 4;
    let y = area.y as i32 + (area.height.saturating_sub(body_h) / 2) as i32;

    canvas.stroke_rect(x, y, body_w, body_h, WHITE);
    canvas.fill_rect(x + body_w as i32, y + (body_h / 3) as i32, 3, body_h / 3, WHITE);

    let percentage = percentage.min(100);
    let color = if overheated || percentage <= BATTERY_LOW_PERCENT { BATTERY_ALERT } else { BATTERY_OK };
    let inner_w = body_w.saturating_sub(4);
    let fill_w = inner_w * percentage as u32 / 100;
    canvas.fill_rect(x + 2, y + 2, fill_w, body_h.saturating_sub(4), color);
}
