use std::collections::HashMap;

use crate::quantity::energy::KilowattHours;

/// Last known numeric value per monitored entity.
///
/// Unavailable readings are simply not stored, so a flapping sensor keeps its last
/// known value until it recovers.
#[derive(Default)]
pub struct Readings(HashMap<String, f64>);

impl Readings {
    pub fn insert(&mut self, entity_id: &str, value: f64) {
        self.0.insert(entity_id.to_string(), value);
    }

    pub fn value(&self, entity_id: &str) -> Option<f64> {
        self.0.get(entity_id).copied()
    }

    pub fn of(&self, entity_id: Option<&str>) -> Option<f64> {
        entity_id.and_then(|entity_id| self.value(entity_id))
    }

    /// Absolute energy total of an optional channel, zero when never seen.
    pub fn total(&self, entity_id: Option<&str>) -> KilowattHours {
        KilowattHours(self.of(entity_id).unwrap_or_default())
    }
}
