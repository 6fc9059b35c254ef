use std::{collections::BTreeSet, str::FromStr};

use chrono::NaiveDate;

use crate::{
    core::benchmark::Country,
    prelude::*,
    quantity::{cost::Cost, energy::KilowattHours, power::Kilowatts},
};

/// Immutable tracker configuration for one run.
///
/// Structural changes (quota on/off, battery entities, benchmark on/off) rebuild the
/// monitored-entity set, which means restarting the process with new flags.
pub struct TrackerConfig {
    pub pv_production_entity: String,
    pub grid_export_entity: Option<String>,
    pub grid_import_entity: Option<String>,
    pub consumption_entity: Option<String>,

    pub prices: PriceConfig,
    pub investment: InvestmentConfig,
    pub quota: Option<QuotaConfig>,
    pub battery: BatteryConfig,
    pub benchmark: Option<BenchmarkConfig>,
    pub strings: Vec<StringConfig>,
}

impl TrackerConfig {
    /// Every entity the tracker wants change notifications for.
    pub fn monitored_entities(&self) -> BTreeSet<&str> {
        let mut entities = BTreeSet::new();
        entities.insert(self.pv_production_entity.as_str());
        entities.extend(self.grid_export_entity.as_deref());
        entities.extend(self.grid_import_entity.as_deref());
        entities.extend(self.consumption_entity.as_deref());
        entities.extend(self.prices.import_price_entity.as_deref());
        entities.extend(self.prices.feed_in_tariff_entity.as_deref());
        entities.extend(self.battery.soc_entity.as_deref());
        entities.extend(self.battery.charge_entity.as_deref());
        entities.extend(self.battery.discharge_entity.as_deref());
        if let Some(benchmark) = &self.benchmark {
            entities.extend(benchmark.heat_pump_entity.as_deref());
        }
        for string in &self.strings {
            entities.insert(string.energy_entity.as_str());
            entities.extend(string.power_entity.as_deref());
        }
        entities
    }

    pub fn heat_pump_entity(&self) -> Option<&str> {
        self.benchmark.as_ref().and_then(|benchmark| benchmark.heat_pump_entity.as_deref())
    }

    pub fn is_string_energy(&self, entity_id: &str) -> bool {
        self.strings.iter().any(|string| string.energy_entity == entity_id)
    }

    pub fn is_string_power(&self, entity_id: &str) -> bool {
        self.strings.iter().any(|string| string.power_entity.as_deref() == Some(entity_id))
    }
}

/// Currency unit of a statically configured price.
#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum PriceUnit {
    /// Major unit: euro per kilowatt-hour.
    Eur,
    /// Minor unit: cent per kilowatt-hour.
    Cent,
}

pub struct PriceConfig {
    /// Static net import price, expressed in [`PriceConfig::import_price_unit`].
    pub import_price: f64,
    pub import_price_unit: PriceUnit,
    pub import_price_entity: Option<String>,

    /// Static feed-in tariff, expressed in [`PriceConfig::feed_in_tariff_unit`].
    pub feed_in_tariff: f64,
    pub feed_in_tariff_unit: PriceUnit,
    pub feed_in_tariff_entity: Option<String>,

    /// Gross price = net price × markup (grid fees, levies, VAT).
    pub markup_factor: f64,
}

pub struct InvestmentConfig {
    pub installation_cost: Cost,
    pub installation_date: Option<NaiveDate>,

    /// Savings accumulated before tracking started.
    pub savings_offset: Cost,
    /// Self-consumed energy before tracking started.
    pub energy_offset_self: KilowattHours,
    /// Exported energy before tracking started.
    pub energy_offset_export: KilowattHours,
}

pub struct QuotaConfig {
    pub yearly_budget: KilowattHours,
    pub start_date: Option<NaiveDate>,
    /// Import meter reading at the start of the quota period. Zero means
    /// "capture automatically from the first reading on or after the start date".
    pub start_meter: KilowattHours,
    pub monthly_rate: Cost,
}

#[derive(Default)]
pub struct BatteryConfig {
    pub soc_entity: Option<String>,
    pub charge_entity: Option<String>,
    pub discharge_entity: Option<String>,
    pub capacity: KilowattHours,
}

impl BatteryConfig {
    pub const fn is_configured(&self) -> bool {
        self.soc_entity.is_some() || self.charge_entity.is_some() || self.discharge_entity.is_some()
    }
}

pub struct BenchmarkConfig {
    pub household_size: u8,
    pub country: Country,
    pub heat_pump: bool,
    pub heat_pump_entity: Option<String>,
}

/// One photovoltaic string: `name:energy_entity[:power_entity[:rated_kwp]]`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StringConfig {
    pub name: String,
    pub energy_entity: String,
    pub power_entity: Option<String>,
    pub rated_capacity: Option<Kilowatts>,
}

impl FromStr for StringConfig {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let mut parts = value.splitn(4, ':');
        let name = parts.next().unwrap_or_default().trim();
        let energy_entity = parts.next().unwrap_or_default().trim();
        ensure!(!name.is_empty(), "string name must not be empty in `{value}`");
        ensure!(!energy_entity.is_empty(), "string energy entity must not be empty in `{value}`");
        let power_entity = parts.next().map(str::trim).filter(|part| !part.is_empty());
        let rated_capacity = parts
            .next()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Kilowatts::from_str)
            .transpose()
            .with_context(|| format!("invalid rated capacity in `{value}`"))?;
        Ok(Self {
            name: name.to_string(),
            energy_entity: energy_entity.to_string(),
            power_entity: power_entity.map(ToString::to_string),
            rated_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_string_config_full() -> Result {
        let config: StringConfig = "South:sensor.pv_south_energy:sensor.pv_south_power:5.2".parse()?;
        assert_eq!(config.name, "South");
        assert_eq!(config.energy_entity, "sensor.pv_south_energy");
        assert_eq!(config.power_entity.as_deref(), Some("sensor.pv_south_power"));
        assert_eq!(config.rated_capacity, Some(Kilowatts(5.2)));
        Ok(())
    }

    #[test]
    fn parse_string_config_energy_only() -> Result {
        let config: StringConfig = "East:sensor.pv_east_energy".parse()?;
        assert_eq!(config.power_entity, None);
        assert_eq!(config.rated_capacity, None);
        Ok(())
    }

    #[test]
    fn parse_string_config_capacity_without_power() -> Result {
        let config: StringConfig = "West:sensor.pv_west_energy::7.5".parse()?;
        assert_eq!(config.power_entity, None);
        assert_eq!(config.rated_capacity, Some(Kilowatts(7.5)));
        Ok(())
    }

    #[test]
    fn parse_string_config_rejects_missing_entity() {
        assert!("Nameless".parse::<StringConfig>().is_err());
    }
}
