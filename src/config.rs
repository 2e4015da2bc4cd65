//! Overlay tuning values.
//!
//! Everything that shapes the bubble's look and feel lives here so the
//! interaction code never hard-codes pixel or timing literals.

use std::path::PathBuf;
use std::time::Duration;

use crate::geometry::{Point, Screen, Size};

/// Sizes (in dp) and timings for the overlay surfaces and gestures
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Bubble diameter
    pub bubble_size_dp: i32,
    /// Distance kept between any surface and the screen edge
    pub edge_margin_dp: i32,
    /// Bubble position used when nothing was persisted yet
    pub default_position_dp: (i32, i32),
    /// Movement needed on either axis before a touch counts as a drag
    pub drag_threshold_dp: i32,
    /// Minimum interval between two forwarded drag updates (~60 per second)
    pub drag_update_interval: Duration,
    pub menu_width_dp: i32,
    /// Used for clamping before the menu has been measured
    pub menu_estimated_height_dp: i32,
    /// How far above the bubble the menu opens
    pub menu_anchor_offset_dp: i32,
    /// Minimum top distance of the menu anchor before clamping
    pub menu_min_top_dp: i32,
    pub menu_open_translation_dp: i32,
    pub menu_close_translation_dp: i32,
    pub menu_open_duration: Duration,
    pub menu_close_duration: Duration,
    pub snap_duration: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            bubble_size_dp: 56,
            edge_margin_dp: 8,
            default_position_dp: (16, 120),
            drag_threshold_dp: 6,
            drag_update_interval: Duration::from_millis(16),
            menu_width_dp: 220,
            menu_estimated_height_dp: 320,
            menu_anchor_offset_dp: 260,
            menu_min_top_dp: 16,
            menu_open_translation_dp: 16,
            menu_close_translation_dp: 8,
            menu_open_duration: Duration::from_millis(160),
            menu_close_duration: Duration::from_millis(120),
            snap_duration: Duration::from_millis(140),
        }
    }
}

impl OverlayConfig {
    pub fn bubble_size(&self, screen: &Screen) -> Size {
        Size::square(screen.dp(self.bubble_size_dp))
    }

    pub fn margin(&self, screen: &Screen) -> i32 {
        screen.dp(self.edge_margin_dp)
    }

    pub fn default_position(&self, screen: &Screen) -> Point {
        let (x, y) = self.default_position_dp;
        Point::new(screen.dp(x), screen.dp(y))
    }

    pub fn menu_size(&self, screen: &Screen) -> Size {
        Size::new(
            screen.dp(self.menu_width_dp),
            screen.dp(self.menu_estimated_height_dp),
        )
    }
}

/// Daemon-wide settings assembled from the command line
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub overlay: OverlayConfig,
    /// Directory holding `overlay.json` and `permission.json`
    pub state_dir: PathBuf,
    pub permission_timeout: Duration,
    /// Program (plus arguments) launched to deliver a route when no host is listening
    pub host_command: Option<Vec<String>>,
    pub density: f32,
    /// Output size used by the headless compositor
    pub headless_screen: (i32, i32),
    pub headless: bool,
}

/// Default location of the durable overlay state
pub fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("spark-bubble")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dp_values_scale_with_density() {
        let config = OverlayConfig::default();
        let screen = Screen::new(1440, 3040, 2.0);
        assert_eq!(config.bubble_size(&screen), Size::square(112));
        assert_eq!(config.margin(&screen), 16);
        assert_eq!(config.default_position(&screen), Point::new(32, 240));
        assert_eq!(config.menu_size(&screen), Size::new(440, 640));
    }

    #[test]
    fn default_state_dir_is_namespaced() {
        assert!(default_state_dir().ends_with("spark-bubble"));
    }
}
