use std::ops::Div;

use crate::quantity::{cost::Cost, rate::KilowattHourRate};

quantity!(KilowattHours, suffix: "kWh", precision: 2);

implement_mul!(KilowattHours, KilowattHourRate, Cost);

impl KilowattHours {
    /// Annualise a total tracked over the given number of days.
    pub fn annualised(self, days: i64) -> Self {
        Self(self.0 / days as f64 * 365.0)
    }
}

impl Div<KilowattHours> for KilowattHours {
    type Output = f64;

    fn div(self, rhs: KilowattHours) -> Self::Output {
        self.0 / rhs.0
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn multiply_by_rate_ok() {
        let cost = KilowattHours(7.0) * KilowattHourRate(0.25);
        assert_abs_diff_eq!(cost.0, 1.75);
    }

    #[test]
    fn annualised_ok() {
        assert_abs_diff_eq!(KilowattHours(100.0).annualised(100).0, 365.0);
    }
}
