use chrono::NaiveDate;
use clap::Parser;

use crate::{
    core::{
        benchmark::Country,
        config::{
            BatteryConfig,
            BenchmarkConfig,
            InvestmentConfig,
            PriceConfig,
            PriceUnit,
            QuotaConfig,
            StringConfig,
            TrackerConfig,
        },
    },
    quantity::{cost::Cost, energy::KilowattHours},
};

/// The full tracker configuration as command line options.
#[derive(Parser)]
pub struct SettingsArgs {
    #[clap(flatten)]
    entities: EntityArgs,

    #[clap(flatten)]
    prices: PriceArgs,

    #[clap(flatten)]
    investment: InvestmentArgs,

    #[clap(flatten)]
    quota: QuotaArgs,

    #[clap(flatten)]
    battery: BatteryArgs,

    #[clap(flatten)]
    benchmark: BenchmarkArgs,

    /// Photovoltaic string as `name:energy_entity[:power_entity[:rated_kwp]]`,
    /// repeatable.
    #[clap(long = "pv-string", env = "PV_STRINGS", value_delimiter = ',')]
    strings: Vec<StringConfig>,
}

#[derive(Parser)]
struct EntityArgs {
    /// Cumulative production counter of the inverter.
    #[clap(long = "pv-production-entity", env = "PV_PRODUCTION_ENTITY")]
    pv_production: String,

    /// Cumulative grid export counter.
    #[clap(long = "grid-export-entity", env = "GRID_EXPORT_ENTITY")]
    grid_export: Option<String>,

    /// Cumulative grid import counter.
    #[clap(long = "grid-import-entity", env = "GRID_IMPORT_ENTITY")]
    grid_import: Option<String>,

    /// Cumulative household consumption counter.
    #[clap(long = "consumption-entity", env = "CONSUMPTION_ENTITY")]
    consumption: Option<String>,
}

#[derive(Parser)]
struct PriceArgs {
    /// Static net import price.
    #[clap(long = "import-price", env = "IMPORT_PRICE", default_value = "0.1092")]
    import_price: f64,

    #[clap(long = "import-price-unit", env = "IMPORT_PRICE_UNIT", value_enum, default_value = "eur")]
    import_price_unit: PriceUnit,

    /// Live import price entity; wins over the static price while available.
    #[clap(long = "import-price-entity", env = "IMPORT_PRICE_ENTITY")]
    import_price_entity: Option<String>,

    /// Static feed-in tariff.
    #[clap(long = "feed-in-tariff", env = "FEED_IN_TARIFF", default_value = "0.08")]
    feed_in_tariff: f64,

    #[clap(long = "feed-in-tariff-unit", env = "FEED_IN_TARIFF_UNIT", value_enum, default_value = "eur")]
    feed_in_tariff_unit: PriceUnit,

    /// Live feed-in tariff entity.
    #[clap(long = "feed-in-tariff-entity", env = "FEED_IN_TARIFF_ENTITY")]
    feed_in_tariff_entity: Option<String>,

    /// Gross price factor for grid fees, levies and VAT.
    #[clap(long = "markup-factor", env = "MARKUP_FACTOR", default_value = "2.0")]
    markup_factor: f64,
}

#[derive(Parser)]
struct InvestmentArgs {
    /// Total installation cost of the system.
    #[clap(long = "installation-cost", env = "INSTALLATION_COST", default_value = "10000")]
    installation_cost: Cost,

    #[clap(long = "installation-date", env = "INSTALLATION_DATE")]
    installation_date: Option<NaiveDate>,

    /// Savings accumulated before tracking started.
    #[clap(long = "savings-offset", env = "SAVINGS_OFFSET", default_value = "0")]
    savings_offset: Cost,

    /// Self-consumed energy before tracking started.
    #[clap(long = "energy-offset-self", env = "ENERGY_OFFSET_SELF", default_value = "0")]
    energy_offset_self: KilowattHours,

    /// Exported energy before tracking started.
    #[clap(long = "energy-offset-export", env = "ENERGY_OFFSET_EXPORT", default_value = "0")]
    energy_offset_export: KilowattHours,
}

#[derive(Parser)]
struct QuotaArgs {
    /// Track grid import against a yearly budget.
    #[clap(long = "quota", env = "QUOTA_ENABLED")]
    enabled: bool,

    #[clap(long = "quota-yearly-kwh", env = "QUOTA_YEARLY_KWH", default_value = "4000")]
    yearly_budget: KilowattHours,

    #[clap(long = "quota-start-date", env = "QUOTA_START_DATE")]
    start_date: Option<NaiveDate>,

    /// Import meter reading at the period start; zero captures it automatically.
    #[clap(long = "quota-start-meter", env = "QUOTA_START_METER", default_value = "0")]
    start_meter: KilowattHours,

    /// Monthly payment towards the quota.
    #[clap(long = "quota-monthly-rate", env = "QUOTA_MONTHLY_RATE", default_value = "0")]
    monthly_rate: Cost,
}

#[derive(Parser)]
struct BatteryArgs {
    #[clap(long = "battery-soc-entity", env = "BATTERY_SOC_ENTITY")]
    soc: Option<String>,

    /// Cumulative battery charge counter.
    #[clap(long = "battery-charge-entity", env = "BATTERY_CHARGE_ENTITY")]
    charge: Option<String>,

    /// Cumulative battery discharge counter.
    #[clap(long = "battery-discharge-entity", env = "BATTERY_DISCHARGE_ENTITY")]
    discharge: Option<String>,

    #[clap(long = "battery-capacity", env = "BATTERY_CAPACITY", default_value = "10")]
    capacity: KilowattHours,
}

#[derive(Parser)]
struct BenchmarkArgs {
    /// Compare the household against reference consumption data.
    #[clap(long = "benchmark", env = "BENCHMARK_ENABLED")]
    enabled: bool,

    #[clap(long = "benchmark-household-size", env = "BENCHMARK_HOUSEHOLD_SIZE", default_value = "3")]
    household_size: u8,

    #[clap(long = "benchmark-country", env = "BENCHMARK_COUNTRY", value_enum, default_value = "at")]
    country: Country,

    /// The household heats with a heat pump.
    #[clap(long = "benchmark-heat-pump", env = "BENCHMARK_HEAT_PUMP")]
    heat_pump: bool,

    /// Cumulative heat pump consumption counter, tracked separately for a fair
    /// comparison.
    #[clap(long = "benchmark-heat-pump-entity", env = "BENCHMARK_HEAT_PUMP_ENTITY")]
    heat_pump_entity: Option<String>,
}

impl SettingsArgs {
    pub fn into_config(self) -> TrackerConfig {
        TrackerConfig {
            pv_production_entity: self.entities.pv_production,
            grid_export_entity: self.entities.grid_export,
            grid_import_entity: self.entities.grid_import,
            consumption_entity: self.entities.consumption,
            prices: PriceConfig {
                import_price: self.prices.import_price,
                import_price_unit: self.prices.import_price_unit,
                import_price_entity: self.prices.import_price_entity,
                feed_in_tariff: self.prices.feed_in_tariff,
                feed_in_tariff_unit: self.prices.feed_in_tariff_unit,
                feed_in_tariff_entity: self.prices.feed_in_tariff_entity,
                markup_factor: self.prices.markup_factor,
            },
            investment: InvestmentConfig {
                installation_cost: self.investment.installation_cost,
                installation_date: self.investment.installation_date,
                savings_offset: self.investment.savings_offset,
                energy_offset_self: self.investment.energy_offset_self,
                energy_offset_export: self.investment.energy_offset_export,
            },
            quota: self.quota.enabled.then(|| QuotaConfig {
                yearly_budget: self.quota.yearly_budget,
                start_date: self.quota.start_date,
                start_meter: self.quota.start_meter,
                monthly_rate: self.quota.monthly_rate,
            }),
            battery: BatteryConfig {
                soc_entity: self.battery.soc,
                charge_entity: self.battery.charge,
                discharge_entity: self.battery.discharge,
                capacity: self.battery.capacity,
            },
            benchmark: self.benchmark.enabled.then(|| BenchmarkConfig {
                household_size: self.benchmark.household_size,
                country: self.benchmark.country,
                heat_pump: self.benchmark.heat_pump,
                heat_pump_entity: self.benchmark.heat_pump_entity,
            }),
            strings: self.strings,
        }
    }
}
