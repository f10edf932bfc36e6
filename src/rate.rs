//! Rates derived from absolute counters.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::MeasureError;
use crate::measure::Measure;

/// How far a timestamp may run backwards before a sample is rejected.
/// Wall clocks occasionally jump back a little.
const CLOCK_GRACE_MS: i64 = 100;

/// Computes the rate of change of a counter per time unit, e.g. documents per second.
///
/// Keep one tracker per counter across polling cycles, so that the previous sample is
/// available when the next one is recorded.
#[derive(Debug, Clone)]
pub struct RateTracker {
    /// The time unit the rate is based on.
    unit: Duration,
    previous_value: f64,
    /// Zero while there is no previous sample.
    previous_timestamp: i64,
    value: f64,
    timestamp: i64,
}

impl RateTracker {
    /// Create a tracker computing rates per `unit`.
    ///
    /// A zero unit is a programming error and panics in debug builds. In release builds
    /// every rate derived from two samples is non-finite.
    pub fn new(unit: Duration) -> Self {
        debug_assert!(!unit.is_zero(), "rate unit must not be zero");

        Self {
            unit,
            previous_value: 0.0,
            previous_timestamp: 0,
            value: 0.0,
            timestamp: 0,
        }
    }

    /// A tracker computing rates per second.
    pub fn per_second() -> Self {
        Self::new(Duration::from_secs(1))
    }

    /// Record the counter value observed at the given timestamp (milliseconds).
    /// The latest sample becomes the previous one.
    pub fn record_sample(&mut self, value: f64, timestamp: i64) -> Result<(), MeasureError> {
        if self.previous_timestamp != 0 && timestamp + CLOCK_GRACE_MS <= self.previous_timestamp {
            return Err(MeasureError::OutOfOrderSample {
                timestamp,
                previous: self.previous_timestamp,
            });
        }

        self.previous_value = self.value;
        self.previous_timestamp = self.timestamp;

        self.value = value;
        self.timestamp = timestamp;

        Ok(())
    }

    /// The latest absolute value, not the rate.
    pub fn current_value(&self) -> Measure {
        Measure::with_value(self.value)
    }

    /// The change of the value per time unit between the last two samples.
    ///
    /// Zero until two samples were recorded. The rate is negative if the counter
    /// decreased. Two samples with the same timestamp yield a non-finite rate.
    pub fn derived_rate(&self) -> Measure {
        if self.previous_timestamp == 0 {
            return Measure::with_value(0.0);
        }

        let duration = (self.timestamp - self.previous_timestamp) as f64;
        let diff = self.value - self.previous_value;

        let time_divisor = duration / (self.unit.as_secs_f64() * 1000.0);

        Measure::with_value(diff / time_divisor)
    }
}

/// The rate trackers of a polling context, by counter name.
///
/// Owned by the orchestrator for its whole lifetime and passed into every collection
/// cycle, so that each counter keeps its history.
#[derive(Debug)]
pub struct RateTrackers {
    unit: Duration,
    trackers: HashMap<String, RateTracker>,
}

impl RateTrackers {
    /// No trackers yet. Trackers created later compute rates per `unit`.
    pub fn new(unit: Duration) -> Self {
        debug_assert!(!unit.is_zero(), "rate unit must not be zero");

        Self {
            unit,
            trackers: HashMap::new(),
        }
    }

    /// No trackers yet. Trackers created later compute rates per second.
    pub fn per_second() -> Self {
        Self::new(Duration::from_secs(1))
    }

    /// Record a sample for the named counter, creating its tracker on first use.
    pub fn record(
        &mut self,
        counter: &str,
        value: f64,
        timestamp: i64,
    ) -> Result<&RateTracker, MeasureError> {
        let unit = self.unit;
        let tracker = self
            .trackers
            .entry(counter.to_owned())
            .or_insert_with(|| RateTracker::new(unit));

        tracker.record_sample(value, timestamp)?;

        Ok(tracker)
    }

    /// The tracker of the named counter, if a sample was recorded for it.
    pub fn get(&self, counter: &str) -> Option<&RateTracker> {
        self.trackers.get(counter)
    }

    /// Number of counters with a tracker.
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    /// Whether no sample was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(expected: f64, actual: f64) {
        assert!(
            (expected - actual).abs() < 0.01,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_derived_rate() {
        let mut tracker = RateTracker::per_second();

        tracker.record_sample(4.0, 4000).unwrap();
        assert_close(4.0, tracker.current_value().value());
        assert_close(0.0, tracker.derived_rate().value());

        // increased by one in one second
        tracker.record_sample(5.0, 5000).unwrap();
        assert_close(5.0, tracker.current_value().value());
        assert_close(1.0, tracker.derived_rate().value());

        // decreased by two in half a second
        tracker.record_sample(3.0, 5500).unwrap();
        assert_close(3.0, tracker.current_value().value());
        assert_close(-4.0, tracker.derived_rate().value());

        tracker.record_sample(100.0, 7234).unwrap();
        assert_close(100.0, tracker.current_value().value());
        assert_close(55.94, tracker.derived_rate().value());

        assert_eq!(
            tracker.record_sample(1.0, 100),
            Err(MeasureError::OutOfOrderSample {
                timestamp: 100,
                previous: 5500,
            })
        );
    }

    #[test]
    fn test_no_rate_before_second_sample() {
        let tracker = RateTracker::per_second();
        assert_close(0.0, tracker.derived_rate().value());
        assert_close(0.0, tracker.current_value().value());
        assert_eq!(tracker.current_value().dynamic_name(), None);
    }

    #[test]
    fn test_first_sample_is_never_rejected() {
        let mut tracker = RateTracker::per_second();
        tracker.record_sample(1.0, 1).unwrap();
        tracker.record_sample(1.0, 1_000_000).unwrap();
    }

    #[test]
    fn test_clock_grace() {
        let mut tracker = RateTracker::per_second();
        tracker.record_sample(1.0, 10_000).unwrap();
        tracker.record_sample(2.0, 11_000).unwrap();

        // 99ms behind the latest sample is tolerated
        tracker.record_sample(3.0, 10_901).unwrap();

        // the previous sample is now at 11_000
        assert!(tracker.record_sample(4.0, 10_900).is_err());
    }

    #[test]
    fn test_non_decreasing_timestamps_never_fail() {
        let mut tracker = RateTracker::new(Duration::from_millis(1));
        for step in 1..=1000 {
            tracker.record_sample((step % 7) as f64, step / 3 + 1).unwrap();
        }
    }

    #[test]
    fn test_time_unit() {
        let mut tracker = RateTracker::new(Duration::from_secs(60));
        tracker.record_sample(0.0, 1000).unwrap();
        tracker.record_sample(30.0, 31_000).unwrap();
        assert_close(60.0, tracker.derived_rate().value());
    }

    #[test]
    fn test_zero_duration_is_not_finite() {
        let mut tracker = RateTracker::per_second();
        tracker.record_sample(1.0, 1000).unwrap();
        tracker.record_sample(2.0, 1000).unwrap();
        assert!(!tracker.derived_rate().value().is_finite());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "rate unit must not be zero")]
    fn test_zero_unit_rejected() {
        RateTracker::new(Duration::ZERO);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "rate unit must not be zero")]
    fn test_zero_unit_rejected_for_trackers() {
        RateTrackers::new(Duration::ZERO);
    }

    #[test]
    fn test_trackers_by_counter() {
        let mut trackers = RateTrackers::per_second();
        assert!(trackers.is_empty());

        trackers.record("docs", 10.0, 1000).unwrap();
        trackers.record("deleted", 0.0, 1000).unwrap();
        let docs = trackers.record("docs", 30.0, 3000).unwrap();
        assert_close(10.0, docs.derived_rate().value());

        assert_eq!(trackers.len(), 2);
        let deleted = trackers.get("deleted").unwrap();
        assert_close(0.0, deleted.derived_rate().value());
        assert!(trackers.get("unknown").is_none());
    }
}
