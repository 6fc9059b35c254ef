use crate::{prelude::*, quantity::energy::KilowattHours};

/// Maximal plausible movement between two consecutive readings of a main energy
/// counter. Anything above is a spurious absolute-value injection.
pub const MAIN_CHANNEL_CEILING: KilowattHours = KilowattHours(50.0);

/// Heat pumps report less frequently, so they get a higher ceiling.
pub const HEAT_PUMP_CEILING: KilowattHours = KilowattHours(200.0);

/// Converts successive absolute counter readings into non-negative deltas.
///
/// Metering sensors occasionally reset to zero after firmware updates, or report a
/// full cumulative total where a delta is expected. Naive subtraction would corrupt
/// the lifetime accumulators permanently, so anomalous readings rebase the baseline
/// and contribute nothing.
pub struct DeltaTracker {
    ceiling: KilowattHours,
    last: Option<f64>,
}

impl DeltaTracker {
    pub const fn new(ceiling: KilowattHours) -> Self {
        Self { ceiling, last: None }
    }

    /// Feed the next absolute reading and return the accepted delta.
    pub fn advance(&mut self, reading: f64) -> KilowattHours {
        let Some(last) = self.last.replace(reading) else {
            return KilowattHours::ZERO;
        };
        let delta = KilowattHours(reading - last);
        if delta < KilowattHours::ZERO {
            debug!(reading, last, "counter reset, rebasing");
            return KilowattHours::ZERO;
        }
        if delta > self.ceiling {
            debug!(reading, last, "implausible jump, rebasing");
            return KilowattHours::ZERO;
        }
        delta
    }

    /// Move the baseline without producing a delta.
    pub fn rebase(&mut self, reading: f64) {
        self.last = Some(reading);
    }

    pub fn clear(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn first_observation_establishes_baseline() {
        let mut tracker = DeltaTracker::new(MAIN_CHANNEL_CEILING);
        assert_eq!(tracker.advance(500.0), KilowattHours::ZERO);
        assert_abs_diff_eq!(tracker.advance(502.5).0, 2.5);
    }

    #[test]
    fn counter_reset_rebases_without_negative_delta() {
        let mut tracker = DeltaTracker::new(MAIN_CHANNEL_CEILING);
        let _ = tracker.advance(500.0);
        // Device replaced: the counter drops to nearly zero.
        assert_eq!(tracker.advance(0.3), KilowattHours::ZERO);
        assert_abs_diff_eq!(tracker.advance(1.3).0, 1.0);
    }

    #[test]
    fn implausible_jump_is_discarded() {
        let mut tracker = DeltaTracker::new(MAIN_CHANNEL_CEILING);
        let _ = tracker.advance(10.0);
        // The sensor suddenly reports a lifetime total instead of a counter.
        assert_eq!(tracker.advance(4321.0), KilowattHours::ZERO);
        assert_abs_diff_eq!(tracker.advance(4322.0).0, 1.0);
    }

    #[test]
    fn accepted_deltas_never_sum_negative() {
        let mut tracker = DeltaTracker::new(MAIN_CHANNEL_CEILING);
        let readings = [100.0, 101.0, 99.0, 99.5, 1000.0, 1001.0, 0.0, 2.0];
        let total: KilowattHours = readings.iter().map(|&reading| tracker.advance(reading)).sum();
        assert_abs_diff_eq!(total.0, 1.0 + 0.5 + 1.0 + 2.0);
    }

    #[test]
    fn heat_pump_ceiling_accepts_larger_deltas() {
        let mut tracker = DeltaTracker::new(HEAT_PUMP_CEILING);
        let _ = tracker.advance(1000.0);
        assert_abs_diff_eq!(tracker.advance(1150.0).0, 150.0);
    }
}
