use crate::{
    core::{
        config::{PriceConfig, PriceUnit},
        readings::Readings,
    },
    quantity::rate::KilowattHourRate,
};

/// How a raw price value maps onto euro per kilowatt-hour.
#[derive(Copy, Clone)]
pub enum Normalisation {
    /// The unit is configured explicitly.
    Tagged(PriceUnit),
    /// Live sensors rarely declare their unit: anything above 1.0 is taken to be
    /// cent per kilowatt-hour.
    AutoDetect,
}

pub fn normalise(value: f64, normalisation: Normalisation) -> KilowattHourRate {
    match normalisation {
        Normalisation::Tagged(PriceUnit::Eur) => KilowattHourRate(value),
        Normalisation::Tagged(PriceUnit::Cent) => KilowattHourRate(value / 100.0),
        Normalisation::AutoDetect if value > 1.0 => KilowattHourRate(value / 100.0),
        Normalisation::AutoDetect => KilowattHourRate(value),
    }
}

/// Resolves the effective import price and feed-in tariff at any instant.
///
/// A live price entity wins over the static configuration while it is available;
/// transient signal loss falls back to the last known good value, and only then to
/// the static configuration. Malformed sensor values count as signal loss, never as
/// an error.
#[derive(Default)]
pub struct PriceResolver {
    last_known_import: Option<KilowattHourRate>,
    last_known_tariff: Option<KilowattHourRate>,
}

impl PriceResolver {
    /// Refresh the last-known-good caches from the current readings.
    pub fn observe(&mut self, config: &PriceConfig, readings: &Readings) {
        if let Some(raw) = readings.of(config.import_price_entity.as_deref()) {
            self.last_known_import = Some(normalise(raw, Normalisation::AutoDetect));
        }
        if let Some(raw) = readings.of(config.feed_in_tariff_entity.as_deref()) {
            self.last_known_tariff = Some(normalise(raw, Normalisation::AutoDetect));
        }
    }

    /// Net import price in euro per kilowatt-hour.
    pub fn import_price(&self, config: &PriceConfig, readings: &Readings) -> KilowattHourRate {
        Self::resolve(
            config.import_price_entity.as_deref(),
            self.last_known_import,
            config.import_price,
            config.import_price_unit,
            readings,
        )
    }

    /// What the user actually pays per kilowatt-hour: net price times the markup for
    /// grid fees, levies and VAT. Savings calculations must use this one.
    pub fn gross_import_price(&self, config: &PriceConfig, readings: &Readings) -> KilowattHourRate {
        self.import_price(config, readings) * config.markup_factor
    }

    /// Feed-in tariff in euro per kilowatt-hour. Not subject to the markup.
    pub fn export_tariff(&self, config: &PriceConfig, readings: &Readings) -> KilowattHourRate {
        Self::resolve(
            config.feed_in_tariff_entity.as_deref(),
            self.last_known_tariff,
            config.feed_in_tariff,
            config.feed_in_tariff_unit,
            readings,
        )
    }

    fn resolve(
        entity_id: Option<&str>,
        last_known: Option<KilowattHourRate>,
        static_value: f64,
        static_unit: PriceUnit,
        readings: &Readings,
    ) -> KilowattHourRate {
        if entity_id.is_some() {
            if let Some(raw) = readings.of(entity_id) {
                return normalise(raw, Normalisation::AutoDetect);
            }
            if let Some(cached) = last_known {
                return cached;
            }
        }
        normalise(static_value, Normalisation::Tagged(static_unit))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn config(import_price: f64, unit: PriceUnit) -> PriceConfig {
        PriceConfig {
            import_price,
            import_price_unit: unit,
            import_price_entity: None,
            feed_in_tariff: 0.08,
            feed_in_tariff_unit: PriceUnit::Eur,
            feed_in_tariff_entity: None,
            markup_factor: 2.0,
        }
    }

    #[test]
    fn tagged_cent_divides() {
        assert_abs_diff_eq!(normalise(12.5, Normalisation::Tagged(PriceUnit::Cent)).0, 0.125);
    }

    #[test]
    fn tagged_eur_passes_through() {
        assert_abs_diff_eq!(normalise(12.5, Normalisation::Tagged(PriceUnit::Eur)).0, 12.5);
    }

    #[test]
    fn auto_detect_never_divides_below_one() {
        assert_abs_diff_eq!(normalise(0.95, Normalisation::AutoDetect).0, 0.95);
        assert_abs_diff_eq!(normalise(1.0, Normalisation::AutoDetect).0, 1.0);
        assert_abs_diff_eq!(normalise(25.0, Normalisation::AutoDetect).0, 0.25);
    }

    #[test]
    fn static_price_respects_unit_tag() {
        let resolver = PriceResolver::default();
        let readings = Readings::default();
        let price = resolver.import_price(&config(10.92, PriceUnit::Cent), &readings);
        assert_abs_diff_eq!(price.0, 0.1092);
    }

    #[test]
    fn gross_price_applies_markup() {
        let resolver = PriceResolver::default();
        let readings = Readings::default();
        let price = resolver.gross_import_price(&config(0.1, PriceUnit::Eur), &readings);
        assert_abs_diff_eq!(price.0, 0.2);
    }

    #[test]
    fn live_entity_wins_and_caches() {
        let mut config = config(0.1, PriceUnit::Eur);
        config.import_price_entity = Some("sensor.spot_price".to_string());
        let mut resolver = PriceResolver::default();
        let mut readings = Readings::default();

        // No reading yet and nothing cached: static fallback.
        assert_abs_diff_eq!(resolver.import_price(&config, &readings).0, 0.1);

        // A live value arrives (auto-detected as cent).
        readings.insert("sensor.spot_price", 32.0);
        resolver.observe(&config, &readings);
        assert_abs_diff_eq!(resolver.import_price(&config, &readings).0, 0.32);

        // The sensor goes away: last known good wins over the static value.
        let resolver_after_loss = resolver;
        let empty = Readings::default();
        assert_abs_diff_eq!(resolver_after_loss.import_price(&config, &empty).0, 0.32);
    }
}
