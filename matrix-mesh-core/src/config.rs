//! Runtime configuration shared by all mesh components.
//!
//! All durations are in logical-time units. The firmware clock ticks in
//! milliseconds, so the defaults below are milliseconds.

use crate::render::Geometry;
use crate::LogicalTime;

/// Tunables for peer tracking, scheduling and broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Peers not heard from within this window are dropped.
    pub liveness_timeout: LogicalTime,
    /// Time between pattern transitions. Boundaries sit on multiples of it.
    pub transition_period: LogicalTime,
    /// How often each board announces itself.
    pub announce_interval: LogicalTime,
    /// How often the display is redrawn.
    pub render_interval: LogicalTime,
    /// Number of times a pushed custom pattern is rebroadcast.
    pub push_repeats: u8,
    /// Spacing between two rebroadcasts of a pushed pattern.
    pub push_interval: LogicalTime,
    /// Display intensity at a transition boundary.
    pub min_intensity: u8,
    /// Display intensity away from any boundary.
    pub max_intensity: u8,
    /// Physical matrix size of one board.
    pub geometry: Geometry,
}

impl Config {
    /// Override the liveness timeout
    pub fn with_liveness_timeout(mut self, timeout: LogicalTime) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Override the transition period
    pub fn with_transition_period(mut self, period: LogicalTime) -> Self {
        self.transition_period = period;
        self
    }

    /// Override the rebroadcast count for pushed patterns
    pub fn with_push_repeats(mut self, repeats: u8) -> Self {
        self.push_repeats = repeats;
        self
    }

    /// Override the intensity range used for fades
    pub fn with_intensity(mut self, min: u8, max: u8) -> Self {
        self.min_intensity = min.min(max);
        self.max_intensity = max;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            liveness_timeout: 10_000,
            transition_period: 4_000,
            announce_interval: 2_000,
            render_interval: 100,
            push_repeats: 20,
            push_interval: 100,
            min_intensity: 0,
            max_intensity: 5,
            geometry: Geometry::STRIP_32X8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_firmware_timing() {
        let config = Config::default();
        assert_eq!(config.transition_period, 4_000);
        assert_eq!(config.announce_interval, 2_000);
        assert_eq!(config.push_repeats, 20);
        assert_eq!(config.geometry, Geometry::STRIP_32X8);
    }

    #[test]
    fn test_intensity_range_is_ordered() {
        let config = Config::default().with_intensity(9, 3);
        assert_eq!(config.min_intensity, 3);
        assert_eq!(config.max_intensity, 3);
    }
}
