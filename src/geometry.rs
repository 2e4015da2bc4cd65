//! Screen metrics and clamping helpers.
//!
//! All overlay coordinates are integer pixels with the origin at the top-left
//! corner of the output. Sizes in the overlay configuration are expressed in
//! density-independent pixels (dp) and converted here.

use serde::{Deserialize, Serialize};

/// A point in output pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }
}

/// A width/height pair in output pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub const fn square(side: i32) -> Self {
        Self::new(side, side)
    }
}

/// Visible output description
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Screen {
    pub width: i32,
    pub height: i32,
    /// Pixels per density-independent pixel
    pub density: f32,
}

impl Screen {
    pub fn new(width: i32, height: i32, density: f32) -> Self {
        Self {
            width,
            height,
            density: if density > 0.0 { density } else { 1.0 },
        }
    }

    /// Convert density-independent pixels to output pixels.
    pub fn dp(&self, dp: i32) -> i32 {
        (dp as f32 * self.density).round() as i32
    }

    /// Constrain the top-left corner of an item of `size` so that it stays
    /// inside the screen with `margin` pixels to spare on every side.
    ///
    /// When the screen is smaller than the item plus margins the upper bound
    /// collapses onto the margin, so the result is always `>= margin`.
    pub fn clamp(&self, point: Point, size: Size, margin: i32) -> Point {
        let max_x = margin.max(self.width - size.width - margin);
        let max_y = margin.max(self.height - size.height - margin);
        Point::new(point.x.clamp(margin, max_x), point.y.clamp(margin, max_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dp_rounds_to_nearest_pixel() {
        let screen = Screen::new(1080, 2340, 2.75);
        assert_eq!(screen.dp(56), 154);
        assert_eq!(screen.dp(8), 22);
        assert_eq!(Screen::new(100, 100, 1.0).dp(6), 6);
    }

    #[test]
    fn non_positive_density_falls_back_to_one() {
        assert_eq!(Screen::new(10, 10, 0.0).density, 1.0);
        assert_eq!(Screen::new(10, 10, -2.0).dp(4), 4);
    }

    #[test]
    fn clamp_keeps_item_inside_margins() {
        let screen = Screen::new(1080, 1920, 1.0);
        let size = Size::square(56);
        let samples = [
            Point::new(-500, -500),
            Point::new(0, 0),
            Point::new(540, 960),
            Point::new(5000, 5000),
            Point::new(1080, -3),
        ];
        for sample in samples {
            let clamped = screen.clamp(sample, size, 8);
            assert!(clamped.x >= 8 && clamped.x <= 1080 - 56 - 8, "{clamped:?}");
            assert!(clamped.y >= 8 && clamped.y <= 1920 - 56 - 8, "{clamped:?}");
        }
    }

    #[test]
    fn offset_saturates_at_the_edges_of_the_range() {
        assert_eq!(Point::new(i32::MAX - 1, 0).offset(10, 0), Point::new(i32::MAX, 0));
        assert_eq!(Point::new(0, i32::MIN + 2).offset(0, -10), Point::new(0, i32::MIN));
        assert_eq!(Point::new(5, 5).offset(-2, 3), Point::new(3, 8));
    }

    #[test]
    fn clamp_on_tiny_screen_pins_to_margin() {
        let screen = Screen::new(40, 40, 1.0);
        let clamped = screen.clamp(Point::new(30, 30), Size::square(56), 8);
        assert_eq!(clamped, Point::new(8, 8));
    }
}
