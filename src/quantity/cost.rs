use std::ops::Div;

use crate::quantity::{energy::KilowattHours, rate::KilowattHourRate};

quantity!(Cost, suffix: "€", precision: 2);

impl Div<KilowattHours> for Cost {
    type Output = KilowattHourRate;

    fn div(self, rhs: KilowattHours) -> Self::Output {
        KilowattHourRate(self.0 / rhs.0)
    }
}

impl Div<Cost> for Cost {
    type Output = f64;

    fn div(self, rhs: Cost) -> Self::Output {
        self.0 / rhs.0
    }
}
