/// Scheduler and pattern defaults
use std::time::Duration;

pub const DEFAULT_ROWS: usize = 4;
pub const DEFAULT_STEPS: usize = 16;
pub const DEFAULT_BEATS_PER_PATTERN: u32 = 4;

const MIN_LOOKAHEAD_INTERVAL: Duration = Duration::from_millis(1);

/// Timing knobs of the lookahead scheduler.
///
/// `lookahead_interval` is how often the worker wakes up; `schedule_ahead`
/// (seconds) is how far past "now" each wake-up commits events. The window
/// has to be wider than the interval or steps would be dispatched late.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub lookahead_interval: Duration,
    pub schedule_ahead: f64,
    pub start_latency: f64,
    pub beats_per_pattern: u32,
}

impl SchedulerConfig {
    pub fn new(
        lookahead_interval: Duration,
        schedule_ahead: f64,
        start_latency: f64,
        beats_per_pattern: u32,
    ) -> Self {
        let lookahead_interval = lookahead_interval.max(MIN_LOOKAHEAD_INTERVAL);
        let min_window = lookahead_interval.as_secs_f64();
        let schedule_ahead = if schedule_ahead.is_finite() {
            schedule_ahead.max(min_window)
        } else {
            min_window
        };
        let start_latency = if start_latency.is_finite() {
            start_latency.max(0.0)
        } else {
            0.0
        };

        Self {
            lookahead_interval,
            schedule_ahead,
            start_latency,
            beats_per_pattern: beats_per_pattern.max(1),
        }
    }

    pub fn with_lookahead_interval(self, interval: Duration) -> Self {
        Self::new(
            interval,
            self.schedule_ahead,
            self.start_latency,
            self.beats_per_pattern,
        )
    }

    pub fn with_schedule_ahead(self, seconds: f64) -> Self {
        Self::new(
            self.lookahead_interval,
            seconds,
            self.start_latency,
            self.beats_per_pattern,
        )
    }

    pub fn with_start_latency(self, seconds: f64) -> Self {
        Self::new(
            self.lookahead_interval,
            self.schedule_ahead,
            seconds,
            self.beats_per_pattern,
        )
    }

    pub fn with_beats_per_pattern(self, beats: u32) -> Self {
        Self::new(
            self.lookahead_interval,
            self.schedule_ahead,
            self.start_latency,
            beats,
        )
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookahead_interval: Duration::from_millis(25),
            schedule_ahead: 0.1,
            start_latency: 0.05,
            beats_per_pattern: DEFAULT_BEATS_PER_PATTERN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.lookahead_interval, Duration::from_millis(25));
        assert_eq!(config.schedule_ahead, 0.1);
        assert_eq!(config.start_latency, 0.05);
        assert_eq!(config.beats_per_pattern, 4);
    }

    #[test]
    fn test_window_never_narrower_than_interval() {
        let config = SchedulerConfig::default()
            .with_lookahead_interval(Duration::from_millis(200))
            .with_schedule_ahead(0.05);
        assert_eq!(config.schedule_ahead, 0.2);
    }

    #[test]
    fn test_invalid_values_are_clamped() {
        let config = SchedulerConfig::new(Duration::ZERO, f64::NAN, -1.0, 0);
        assert_eq!(config.lookahead_interval, Duration::from_millis(1));
        assert_eq!(config.schedule_ahead, 0.001);
        assert_eq!(config.start_latency, 0.0);
        assert_eq!(config.beats_per_pattern, 1);
    }
}
