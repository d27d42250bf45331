//! Per-second rate computation from consecutive status polls.
//!
//! One [`RateTracker`] lives inside each server proxy. All counters observed
//! within one poll cycle share a single elapsed-time denominator, fixed once
//! per cycle by [`RateTracker::start_cycle`].

use std::collections::HashMap;
use std::time::Instant;

/// Computes per-second deltas for named monotonically increasing counters.
#[derive(Debug, Default)]
pub struct RateTracker {
    prev_values: HashMap<String, f64>,
    prev_cycle: Option<Instant>,
    dt_secs: Option<f64>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a poll cycle at `now`, fixing the elapsed-time denominator for
    /// every [`per_second`](Self::per_second) call until the next cycle.
    ///
    /// Returns the elapsed seconds, or `None` on the first cycle and whenever
    /// the clock did not advance.
    pub fn start_cycle(&mut self, now: Instant) -> Option<f64> {
        self.dt_secs = self
            .prev_cycle
            .and_then(|prev| now.checked_duration_since(prev))
            .map(|d| d.as_secs_f64())
            .filter(|&dt| dt > 0.0);
        self.prev_cycle = Some(now);
        self.dt_secs
    }

    /// Observes a counter value and returns its per-second rate since the
    /// previous cycle.
    ///
    /// `None` on the first observation for `key`, when the current cycle has
    /// no usable elapsed time, and on counter regression (stats reset).
    pub fn per_second(&mut self, key: &str, value: f64) -> Option<f64> {
        let prev = self.prev_values.insert(key.to_string(), value);
        let dt = self.dt_secs?;
        let prev = prev?;
        (value >= prev).then(|| (value - prev) / dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_observation_has_no_rate() {
        let mut tracker = RateTracker::new();
        let base = Instant::now();
        assert_eq!(tracker.start_cycle(base), None);
        assert_eq!(tracker.per_second("ops", 100.0), None);
    }

    #[test]
    fn second_observation_yields_delta_over_elapsed() {
        let mut tracker = RateTracker::new();
        let base = Instant::now();
        tracker.start_cycle(base);
        tracker.per_second("ops", 100.0);

        let dt = tracker.start_cycle(base + Duration::from_secs(1)).unwrap();
        assert!((dt - 1.0).abs() < 1e-9);
        let rate = tracker.per_second("ops", 150.0).unwrap();
        assert!((rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn all_keys_share_one_denominator() {
        let mut tracker = RateTracker::new();
        let base = Instant::now();
        tracker.start_cycle(base);
        tracker.per_second("in", 0.0);
        tracker.per_second("out", 0.0);

        tracker.start_cycle(base + Duration::from_secs(2));
        let rate_in = tracker.per_second("in", 100.0).unwrap();
        let rate_out = tracker.per_second("out", 10.0).unwrap();
        assert!((rate_in - 50.0).abs() < 1e-9);
        assert!((rate_out - 5.0).abs() < 1e-9);
    }

    #[test]
    fn clock_standing_still_reports_unavailable() {
        let mut tracker = RateTracker::new();
        let base = Instant::now();
        tracker.start_cycle(base);
        tracker.per_second("ops", 100.0);

        assert_eq!(tracker.start_cycle(base), None);
        assert_eq!(tracker.per_second("ops", 150.0), None);
    }

    #[test]
    fn clock_going_backwards_reports_unavailable() {
        let mut tracker = RateTracker::new();
        let base = Instant::now() + Duration::from_secs(10);
        tracker.start_cycle(base);
        tracker.per_second("ops", 100.0);

        assert_eq!(tracker.start_cycle(base - Duration::from_secs(1)), None);
        assert_eq!(tracker.per_second("ops", 150.0), None);
    }

    #[test]
    fn counter_regression_yields_none_then_recovers() {
        let mut tracker = RateTracker::new();
        let base = Instant::now();
        tracker.start_cycle(base);
        tracker.per_second("ops", 100.0);

        tracker.start_cycle(base + Duration::from_secs(1));
        assert_eq!(tracker.per_second("ops", 40.0), None);

        tracker.start_cycle(base + Duration::from_secs(2));
        let rate = tracker.per_second("ops", 50.0).unwrap();
        assert!((rate - 10.0).abs() < 1e-9);
    }
}
