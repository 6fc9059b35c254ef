use crate::{
    core::config::BenchmarkConfig,
    quantity::{energy::KilowattHours, power::Kilowatts},
};

/// Countries with reference consumption data.
///
/// Sources: E-Control (AT), BDEW (DE), BFE (CH), 2023/2024 figures.
#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Country {
    At,
    De,
    Ch,
}

impl Country {
    /// Average yearly household consumption without a heat pump, by household size.
    pub fn reference_household(self, household_size: u8) -> KilowattHours {
        let by_size = match self {
            Self::At => [2200.0, 3500.0, 4000.0, 4500.0, 5500.0, 6500.0],
            Self::De => [2000.0, 3200.0, 3900.0, 4400.0, 5400.0, 6300.0],
            Self::Ch => [2500.0, 3800.0, 4400.0, 5000.0, 6000.0, 7000.0],
        };
        KilowattHours(by_size[usize::from(household_size.clamp(1, 6)) - 1])
    }

    /// Average yearly heat pump consumption for a single-family house.
    pub const fn reference_heat_pump(self) -> KilowattHours {
        match self {
            Self::At => KilowattHours(4000.0),
            Self::De => KilowattHours(4500.0),
            Self::Ch => KilowattHours(3500.0),
        }
    }

    /// Grid mix emission factor in kg CO2 per kilowatt-hour.
    pub const fn co2_factor(self) -> f64 {
        match self {
            Self::At => 0.150,
            Self::De => 0.380,
            Self::Ch => 0.030,
        }
    }
}

/// Everything the benchmark needs from the accumulators and readings.
pub struct BenchmarkInputs {
    pub self_consumption: KilowattHours,
    pub tracked_grid_import: KilowattHours,
    pub days_tracking: i64,
    pub heat_pump_tracked: KilowattHours,
    pub heat_pump_days: Option<i64>,
    pub pv_production_total: KilowattHours,
    pub rated_capacity: Kilowatts,
    pub autarky_rate: Option<f64>,
    pub self_consumption_ratio: f64,
}

pub struct BenchmarkMetrics {
    pub reference_household: KilowattHours,
    pub reference_heat_pump: Option<KilowattHours>,

    /// Own consumption extrapolated to a full year, heat pump included.
    pub own_annual_total: Option<KilowattHours>,
    /// Own consumption extrapolated to a full year, heat pump share removed.
    pub own_household: Option<KilowattHours>,
    /// Heat pump consumption extrapolated to a full year, over its own tracking period.
    pub own_heat_pump: Option<KilowattHours>,
    pub annual_grid_import: Option<KilowattHours>,
    pub annual_pv_production: Option<KilowattHours>,
    /// Yearly production per installed kWp.
    pub specific_yield: Option<f64>,

    /// Household consumption versus the reference, percent above (+) or below (−).
    pub consumption_vs_reference_percent: Option<f64>,
    pub heat_pump_vs_reference_percent: Option<f64>,
    pub annual_co2_avoided_kg: Option<f64>,

    pub efficiency_score: Option<u8>,
    pub rating: Option<&'static str>,
}

pub fn compute(config: &BenchmarkConfig, inputs: &BenchmarkInputs) -> BenchmarkMetrics {
    let reference_household = config.country.reference_household(config.household_size);
    let reference_heat_pump = config.heat_pump.then(|| config.country.reference_heat_pump());

    let own_heat_pump = heat_pump_annual(config, inputs);
    let own_annual_total = annualised_consumption(inputs);
    let own_household = own_annual_total.map(|total| {
        (total - own_heat_pump.unwrap_or(KilowattHours::ZERO)).max(KilowattHours::ZERO)
    });

    let consumption_vs_reference_percent =
        own_household.map(|own| (own - reference_household) / reference_household * 100.0);
    let heat_pump_vs_reference_percent = match (own_heat_pump, reference_heat_pump) {
        (Some(own), Some(reference)) => Some((own - reference) / reference * 100.0),
        _ => None,
    };

    let annual_grid_import = (inputs.days_tracking >= 1
        && inputs.tracked_grid_import > KilowattHours::ZERO)
        .then(|| inputs.tracked_grid_import.annualised(inputs.days_tracking));
    let annual_pv_production = (inputs.days_tracking >= 1
        && inputs.pv_production_total > KilowattHours::ZERO)
        .then(|| inputs.pv_production_total.annualised(inputs.days_tracking));

    let specific_yield = match annual_pv_production {
        Some(production) if inputs.rated_capacity > Kilowatts::ZERO => {
            Some(production.0 / inputs.rated_capacity.0)
        }
        _ => None,
    };
    let annual_co2_avoided_kg =
        annual_pv_production.map(|production| production.0 * config.country.co2_factor());

    let efficiency_score = consumption_vs_reference_percent.map(|comparison| {
        efficiency_score(comparison, inputs.autarky_rate, inputs.self_consumption_ratio)
    });
    let rating = efficiency_score.map(rating);

    BenchmarkMetrics {
        reference_household,
        reference_heat_pump,
        own_annual_total,
        own_household,
        own_heat_pump,
        annual_grid_import,
        annual_pv_production,
        specific_yield,
        consumption_vs_reference_percent,
        heat_pump_vs_reference_percent,
        annual_co2_avoided_kg,
        efficiency_score,
        rating,
    }
}

fn annualised_consumption(inputs: &BenchmarkInputs) -> Option<KilowattHours> {
    if inputs.days_tracking < 1 {
        return None;
    }
    let total = inputs.self_consumption + inputs.tracked_grid_import;
    (total > KilowattHours::ZERO).then(|| total.annualised(inputs.days_tracking))
}

fn heat_pump_annual(config: &BenchmarkConfig, inputs: &BenchmarkInputs) -> Option<KilowattHours> {
    if !config.heat_pump || config.heat_pump_entity.is_none() {
        return None;
    }
    let days = inputs.heat_pump_days?.max(1);
    (inputs.heat_pump_tracked > KilowattHours::ZERO)
        .then(|| inputs.heat_pump_tracked.annualised(days))
}

/// Blend of consumption-vs-reference (40 points), autarky (30) and
/// self-consumption ratio (30), bounded to 0–100.
fn efficiency_score(comparison: f64, autarky_rate: Option<f64>, self_ratio: f64) -> u8 {
    // −50 % consumption scores the full 40 points, +50 % scores none.
    let consumption_score = (20.0 - comparison * 0.4).clamp(0.0, 40.0);
    let autarky_score = autarky_rate.map_or(0.0, |autarky| (autarky * 0.3).min(30.0));
    let ratio_score = (self_ratio * 0.3).min(30.0);
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = (consumption_score + autarky_score + ratio_score) as u8;
    score
}

const fn rating(score: u8) -> &'static str {
    match score {
        80.. => "excellent",
        60..=79 => "very good",
        40..=59 => "good",
        20..=39 => "average",
        _ => "room for improvement",
    }
}
