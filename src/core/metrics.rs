use chrono::{Days, NaiveDate};

use crate::{
    core::{
        benchmark::{self, BenchmarkInputs, BenchmarkMetrics},
        config::{QuotaConfig, TrackerConfig},
        engine::TrackerState,
    },
    quantity::{
        cost::Cost,
        energy::KilowattHours,
        power::{Kilowatts, Watts},
        rate::KilowattHourRate,
    },
};

/// Grid mix emission factor for the lifetime CO2 figure, kg per kilowatt-hour.
const CO2_FACTOR_GRID: f64 = 0.4;

/// Approximations used for the savings averages; deliberately not calendar-exact.
const DAYS_PER_MONTH: f64 = 30.44;
const DAYS_PER_YEAR: f64 = 365.0;

/// The full derived-value tree. Pure reads of the tracker state and configuration:
/// collecting metrics never mutates anything, and values that cannot be computed
/// are `None` rather than zero — "zero budget left" and "no budget configured" are
/// different answers.
pub struct Metrics {
    pub pv_production: KilowattHours,
    pub grid_export: KilowattHours,
    pub grid_import: KilowattHours,
    pub consumption: Option<KilowattHours>,
    pub self_consumption: KilowattHours,
    pub feed_in: KilowattHours,

    pub savings_self_consumption: Cost,
    pub earnings_feed_in: Cost,
    pub total_savings: Cost,
    pub amortisation_percent: f64,
    pub remaining_cost: Cost,
    pub is_amortised: bool,
    pub status: String,
    pub roi_percent: Option<f64>,
    pub annual_roi_percent: Option<f64>,
    pub days_since_installation: i64,
    pub days_tracking: i64,
    pub average_daily_savings: Cost,
    pub average_monthly_savings: Cost,
    pub average_yearly_savings: Cost,
    pub estimated_remaining_days: Option<i64>,
    pub estimated_payback_date: Option<NaiveDate>,

    pub net_import_price: KilowattHourRate,
    pub gross_import_price: KilowattHourRate,
    pub export_tariff: KilowattHourRate,
    pub average_import_price: Option<KilowattHourRate>,
    pub daily_average_import_price: Option<KilowattHourRate>,
    pub monthly_average_import_price: Option<KilowattHourRate>,

    pub daily_grid_import: KilowattHours,
    pub daily_grid_import_cost: Cost,
    pub daily_feed_in: KilowattHours,
    pub daily_feed_in_earnings: Cost,
    pub daily_net_cost: Cost,
    pub monthly_grid_import: KilowattHours,
    pub monthly_grid_import_cost: Cost,

    pub self_consumption_ratio: f64,
    pub autarky_rate: Option<f64>,
    pub co2_saved_kg: f64,

    pub battery: Option<BatteryMetrics>,
    pub quota: Option<QuotaMetrics>,
    pub benchmark: Option<BenchmarkMetrics>,
    pub strings: Vec<StringMetrics>,
    pub string_totals: Option<StringTotals>,
}

pub struct BatteryMetrics {
    pub state_of_charge: Option<f64>,
    pub charge_total: Option<KilowattHours>,
    pub discharge_total: Option<KilowattHours>,
    pub efficiency_percent: Option<f64>,
    pub estimated_cycles: Option<f64>,
}

pub struct QuotaMetrics {
    pub yearly_budget: KilowattHours,
    pub end_date: NaiveDate,
    pub days_elapsed: i64,
    pub days_remaining: i64,
    pub consumed: KilowattHours,
    pub consumed_percent: f64,
    pub remaining: KilowattHours,
    pub expected: KilowattHours,
    pub reserve: KilowattHours,
    pub daily_budget: Option<KilowattHours>,
    pub today_consumed: KilowattHours,
    pub today_remaining: Option<KilowattHours>,
    pub forecast: Option<KilowattHours>,
    pub status: String,
}

pub struct StringMetrics {
    pub name: String,
    pub production: KilowattHours,
    pub daily_average: Option<KilowattHours>,
    pub share_percent: Option<f64>,
    pub peak: Option<Kilowatts>,
    pub daily_peak: Option<Kilowatts>,
    /// Yearly production per installed kWp.
    pub specific_yield: Option<f64>,
    /// Observed peak versus the rated capacity.
    pub performance_ratio_percent: Option<f64>,
}

pub struct StringTotals {
    pub daily_production: Option<KilowattHours>,
    pub peak: Option<Kilowatts>,
    pub daily_peak: Option<Kilowatts>,
}

pub fn collect(config: &TrackerConfig, state: &TrackerState, today: NaiveDate) -> Metrics {
    let acc = &state.acc;
    let investment = &config.investment;

    let pv_production = KilowattHours(
        state.readings.value(&config.pv_production_entity).unwrap_or_default(),
    );
    let grid_export = state.readings.total(config.grid_export_entity.as_deref());
    let grid_import = state.readings.total(config.grid_import_entity.as_deref());
    let consumption =
        state.readings.of(config.consumption_entity.as_deref()).map(KilowattHours);

    let self_consumption = acc.lifetime.self_consumption + investment.energy_offset_self;
    let feed_in = acc.lifetime.feed_in + investment.energy_offset_export;
    let total_savings =
        acc.lifetime.savings_self + acc.lifetime.earnings_feed + investment.savings_offset;
    let installation_cost = investment.installation_cost;

    let amortisation_percent = amortisation_percent(total_savings, installation_cost);
    let remaining_cost = (installation_cost - total_savings).max(Cost::ZERO);
    let is_amortised = total_savings >= installation_cost;
    let status = if is_amortised {
        format!("amortised, {} profit", total_savings - installation_cost)
    } else {
        format!("{amortisation_percent:.1} % amortised")
    };

    let days_tracking =
        acc.lifetime.first_seen.map_or(0, |first_seen| (today - first_seen).num_days());
    let days_since_installation = investment
        .installation_date
        .map_or(days_tracking, |installed| (today - installed).num_days());

    let average_daily_savings = if days_since_installation > 0 {
        total_savings / days_since_installation as f64
    } else {
        Cost::ZERO
    };
    let estimated_remaining_days = estimated_remaining_days(
        is_amortised,
        remaining_cost,
        average_daily_savings,
    );
    let estimated_payback_date = estimated_remaining_days
        .and_then(|days| today.checked_add_days(Days::new(days.unsigned_abs())));

    let roi_percent = (installation_cost > Cost::ZERO)
        .then(|| (total_savings - installation_cost) / installation_cost * 100.0);
    let annual_roi_percent = roi_percent.and_then(|_| {
        (days_since_installation > 0).then(|| {
            let years = days_since_installation as f64 / DAYS_PER_YEAR;
            let annual_savings = total_savings / years;
            (annual_savings - installation_cost / years) / installation_cost * 100.0
        })
    });

    // The ratios work on the live counters rather than the lifetime accumulators,
    // so they follow the day as it happens.
    let current_self_consumption = if consumption.is_some_and(|value| value > KilowattHours::ZERO)
        && config.grid_import_entity.is_some()
    {
        (consumption.unwrap_or_default() - grid_import).max(KilowattHours::ZERO)
    } else {
        (pv_production - grid_export).max(KilowattHours::ZERO)
    };
    let self_consumption_ratio = if pv_production > KilowattHours::ZERO {
        (current_self_consumption / pv_production * 100.0).min(100.0)
    } else {
        0.0
    };
    let autarky_rate = autarky_rate(
        current_self_consumption,
        consumption.filter(|_| config.consumption_entity.is_some()),
        config.grid_import_entity.as_ref().map(|_| grid_import),
    );

    let prices = &state.prices;
    let net_import_price = prices.import_price(&config.prices, &state.readings);
    let gross_import_price = prices.gross_import_price(&config.prices, &state.readings);
    let export_tariff = prices.export_tariff(&config.prices, &state.readings);
    let average_import_price = (acc.import_tracking.tracked > KilowattHours::ZERO)
        .then(|| acc.import_tracking.cost / acc.import_tracking.tracked);
    let daily_average_import_price = (acc.daily.grid_import > KilowattHours::ZERO)
        .then(|| acc.daily.grid_import_cost / acc.daily.grid_import);
    let monthly_average_import_price = (acc.monthly.grid_import > KilowattHours::ZERO)
        .then(|| acc.monthly.grid_import_cost / acc.monthly.grid_import);

    let battery = config.battery.is_configured().then(|| {
        let charge_total =
            state.readings.of(config.battery.charge_entity.as_deref()).map(KilowattHours);
        let discharge_total =
            state.readings.of(config.battery.discharge_entity.as_deref()).map(KilowattHours);
        let efficiency_percent = match (charge_total, discharge_total) {
            (Some(charge), Some(discharge)) if charge > KilowattHours::ZERO => {
                Some(discharge / charge * 100.0)
            }
            _ => None,
        };
        let estimated_cycles = charge_total.and_then(|charge| {
            (config.battery.capacity > KilowattHours::ZERO)
                .then(|| charge / config.battery.capacity)
        });
        BatteryMetrics {
            state_of_charge: state.readings.of(config.battery.soc_entity.as_deref()),
            charge_total,
            discharge_total,
            efficiency_percent,
            estimated_cycles,
        }
    });

    let quota = config.quota.as_ref().and_then(|quota| {
        quota_metrics(
            quota,
            effective_start_meter(quota, state),
            acc.quota.day_start_meter,
            grid_import,
            today,
        )
    });

    let benchmark = config.benchmark.as_ref().map(|benchmark_config| {
        let heat_pump_days =
            acc.heat_pump.first_seen.map(|first_seen| (today - first_seen).num_days());
        benchmark::compute(benchmark_config, &BenchmarkInputs {
            self_consumption,
            tracked_grid_import: acc.import_tracking.tracked,
            days_tracking,
            heat_pump_tracked: acc.heat_pump.tracked,
            heat_pump_days,
            pv_production_total: pv_production,
            rated_capacity: config
                .strings
                .iter()
                .filter_map(|string| string.rated_capacity)
                .sum(),
            autarky_rate,
            self_consumption_ratio,
        })
    });

    let (strings, string_totals) = string_metrics(config, state, today);

    Metrics {
        pv_production,
        grid_export,
        grid_import,
        consumption,
        self_consumption,
        feed_in,
        savings_self_consumption: acc.lifetime.savings_self,
        earnings_feed_in: acc.lifetime.earnings_feed,
        total_savings,
        amortisation_percent,
        remaining_cost,
        is_amortised,
        status,
        roi_percent,
        annual_roi_percent,
        days_since_installation,
        days_tracking,
        average_daily_savings,
        average_monthly_savings: average_daily_savings * DAYS_PER_MONTH,
        average_yearly_savings: average_daily_savings * DAYS_PER_YEAR,
        estimated_remaining_days,
        estimated_payback_date,
        net_import_price,
        gross_import_price,
        export_tariff,
        average_import_price,
        daily_average_import_price,
        monthly_average_import_price,
        daily_grid_import: acc.daily.grid_import,
        daily_grid_import_cost: acc.daily.grid_import_cost,
        daily_feed_in: acc.daily.feed_in,
        daily_feed_in_earnings: acc.daily.feed_in_earnings,
        daily_net_cost: acc.daily.grid_import_cost - acc.daily.feed_in_earnings,
        monthly_grid_import: acc.monthly.grid_import,
        monthly_grid_import_cost: acc.monthly.grid_import_cost,
        self_consumption_ratio,
        autarky_rate,
        co2_saved_kg: self_consumption.0 * CO2_FACTOR_GRID,
        battery,
        quota,
        benchmark,
        strings,
        string_totals,
    }
}

/// Bounded to 0–100 even when the savings exceed the installation cost; a free
/// installation counts as amortised from day one.
pub fn amortisation_percent(total_savings: Cost, installation_cost: Cost) -> f64 {
    if installation_cost <= Cost::ZERO {
        return 100.0;
    }
    (total_savings / installation_cost * 100.0).clamp(0.0, 100.0)
}

/// `None` means the payback date is unknowable (flat or negative trend), which is
/// not the same thing as "today".
fn estimated_remaining_days(
    is_amortised: bool,
    remaining_cost: Cost,
    average_daily_savings: Cost,
) -> Option<i64> {
    if is_amortised {
        return Some(0);
    }
    if average_daily_savings <= Cost::ZERO {
        return None;
    }
    #[expect(clippy::cast_possible_truncation)]
    let days = (remaining_cost / average_daily_savings) as i64;
    Some(days)
}

/// Autarky cannot be derived from production and export alone: that pairing cannot
/// distinguish "no consumption signal" from "zero grid dependency".
fn autarky_rate(
    self_consumption: KilowattHours,
    consumption: Option<KilowattHours>,
    grid_import: Option<KilowattHours>,
) -> Option<f64> {
    if self_consumption <= KilowattHours::ZERO {
        return None;
    }
    if let Some(consumption) = consumption.filter(|&value| value > KilowattHours::ZERO) {
        return Some((self_consumption / consumption * 100.0).min(100.0));
    }
    if let Some(grid_import) = grid_import.filter(|&value| value > KilowattHours::ZERO) {
        let total = self_consumption + grid_import;
        if total > KilowattHours::ZERO {
            return Some((self_consumption / total * 100.0).min(100.0));
        }
    }
    None
}

fn effective_start_meter(
    quota: &QuotaConfig,
    state: &TrackerState,
) -> KilowattHours {
    if quota.start_meter > KilowattHours::ZERO {
        quota.start_meter
    } else {
        state.acc.quota.captured_start_meter.unwrap_or(KilowattHours::ZERO)
    }
}

pub fn quota_metrics(
    config: &QuotaConfig,
    start_meter: KilowattHours,
    day_start_meter: Option<KilowattHours>,
    current_meter: KilowattHours,
    today: NaiveDate,
) -> Option<QuotaMetrics> {
    let start_date = config.start_date?;
    let yearly_budget = config.yearly_budget;

    // The start day counts as day one; the period is a flat 365 days.
    let days_total: i64 = 365;
    let raw_elapsed = (today - start_date).num_days();
    let days_elapsed = if raw_elapsed < 0 { 0 } else { (raw_elapsed + 1).min(days_total) };
    let days_remaining = days_total - days_elapsed;

    let consumed = (current_meter - start_meter).max(KilowattHours::ZERO);
    let consumed_percent = if yearly_budget > KilowattHours::ZERO {
        (consumed / yearly_budget * 100.0).min(100.0)
    } else {
        0.0
    };
    let remaining = yearly_budget - consumed;
    let expected = if today < start_date {
        KilowattHours::ZERO
    } else {
        yearly_budget * (days_elapsed as f64 / days_total as f64)
    };
    let reserve = expected - consumed;
    let daily_budget = (days_remaining > 0).then(|| remaining / days_remaining as f64);

    let today_consumed = match day_start_meter {
        Some(day_start)
            if day_start > KilowattHours::ZERO && current_meter > KilowattHours::ZERO =>
        {
            (current_meter - day_start).max(KilowattHours::ZERO)
        }
        _ => KilowattHours::ZERO,
    };
    let today_remaining = daily_budget.map(|budget| budget - today_consumed);
    let forecast = (days_elapsed > 0).then(|| consumed / days_elapsed as f64 * days_total as f64);

    let status = if reserve >= KilowattHours::ZERO {
        format!("within budget, {:.0} kWh reserve", reserve.0)
    } else {
        format!("over budget by {:.0} kWh", -reserve.0)
    };

    Some(QuotaMetrics {
        yearly_budget,
        end_date: start_date + Days::new(365),
        days_elapsed,
        days_remaining,
        consumed,
        consumed_percent,
        remaining,
        expected,
        reserve,
        daily_budget,
        today_consumed,
        today_remaining,
        forecast,
        status,
    })
}

fn string_metrics(
    config: &TrackerConfig,
    state: &TrackerState,
    today: NaiveDate,
) -> (Vec<StringMetrics>, Option<StringTotals>) {
    if config.strings.is_empty() {
        return (Vec::new(), None);
    }
    let tracking = &state.acc.strings;
    let days = tracking.first_seen.map(|first_seen| (today - first_seen).num_days().max(1));
    let tracked_total: KilowattHours = tracking.tracked.values().copied().sum();

    let strings = config
        .strings
        .iter()
        .map(|string| {
            let production =
                tracking.tracked.get(&string.energy_entity).copied().unwrap_or_default();
            let daily_average = days.and_then(|days| {
                (production > KilowattHours::ZERO).then(|| production / days as f64)
            });
            let share_percent = (tracked_total > KilowattHours::ZERO)
                .then(|| production / tracked_total * 100.0);
            let peak = peak_of(&tracking.peak, string.power_entity.as_deref());
            let daily_peak = peak_of(&tracking.daily_peak, string.power_entity.as_deref());

            // The rated capacity falls back to the observed peak, so panels without
            // a configured kWp still get a yield estimate.
            let rated = string.rated_capacity.or(peak).filter(|&kwp| kwp > Kilowatts::ZERO);
            let specific_yield = match (rated, days) {
                (Some(rated), Some(days)) if production > KilowattHours::ZERO => {
                    Some(production.annualised(days).0 / rated.0)
                }
                _ => None,
            };
            let performance_ratio_percent = match (string.rated_capacity, peak) {
                (Some(rated), Some(peak)) if rated > Kilowatts::ZERO => {
                    Some(peak.0 / rated.0 * 100.0)
                }
                _ => None,
            };

            StringMetrics {
                name: string.name.clone(),
                production,
                daily_average,
                share_percent,
                peak,
                daily_peak,
                specific_yield,
                performance_ratio_percent,
            }
        })
        .collect();

    let peak_total: Watts = tracking.peak.values().copied().sum();
    let daily_peak_total: Watts = tracking.daily_peak.values().copied().sum();
    let totals = StringTotals {
        daily_production: days.and_then(|days| {
            (tracked_total > KilowattHours::ZERO).then(|| tracked_total / days as f64)
        }),
        peak: (peak_total > Watts::ZERO).then(|| Kilowatts::from(peak_total)),
        daily_peak: (daily_peak_total > Watts::ZERO).then(|| Kilowatts::from(daily_peak_total)),
    };
    (strings, Some(totals))
}

fn peak_of(
    peaks: &std::collections::BTreeMap<String, Watts>,
    power_entity: Option<&str>,
) -> Option<Kilowatts> {
    let watts = *peaks.get(power_entity?)?;
    (watts > Watts::ZERO).then(|| Kilowatts::from(watts))
}

/// Section of the presentation catalog; the table renderer and the state publisher
/// group rows by it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Section {
    Amortisation,
    Energy,
    Prices,
    Windows,
    Quota,
    Battery,
    Benchmark,
    Strings,
}

/// One presentable metric. `value` is `None` when the metric is unavailable; the
/// publisher maps that onto the host's "unknown" state.
pub struct MetricRow {
    pub section: Section,
    pub key: String,
    pub label: String,
    pub unit: Option<&'static str>,
    pub value: Option<String>,
}

fn energy(value: KilowattHours) -> Option<String> {
    Some(format!("{:.2}", value.0))
}

fn money(value: Cost) -> Option<String> {
    Some(format!("{:.2}", value.0))
}

fn rate(value: KilowattHourRate) -> Option<String> {
    Some(format!("{:.4}", value.0))
}

fn percent(value: f64) -> Option<String> {
    Some(format!("{value:.1}"))
}

fn power(value: Kilowatts) -> Option<String> {
    Some(format!("{:.1}", value.0))
}

fn integer(value: i64) -> Option<String> {
    Some(value.to_string())
}

impl Metrics {
    /// The declarative presentation catalog: every derived value as a flat row.
    #[expect(clippy::too_many_lines)]
    pub fn rows(&self) -> Vec<MetricRow> {
        use Section::{Amortisation, Battery, Benchmark, Energy, Prices, Quota, Strings, Windows};

        let mut rows = Vec::with_capacity(64);
        let mut push = |section: Section,
                        key: &str,
                        label: &str,
                        unit: Option<&'static str>,
                        value: Option<String>| {
            rows.push(MetricRow {
                section,
                key: key.to_string(),
                label: label.to_string(),
                unit,
                value,
            });
        };

        push(Amortisation, "amortisation_percent", "Amortisation", Some("%"), percent(self.amortisation_percent));
        push(Amortisation, "total_savings", "Total savings", Some("€"), money(self.total_savings));
        push(Amortisation, "remaining_cost", "Remaining cost", Some("€"), money(self.remaining_cost));
        push(Amortisation, "is_amortised", "Amortised", None, Some(self.is_amortised.to_string()));
        push(Amortisation, "status", "Status", None, Some(self.status.clone()));
        push(Amortisation, "savings_self_consumption", "Savings from self-consumption", Some("€"), money(self.savings_self_consumption));
        push(Amortisation, "earnings_feed_in", "Feed-in earnings", Some("€"), money(self.earnings_feed_in));
        push(Amortisation, "roi_percent", "Return on investment", Some("%"), self.roi_percent.and_then(percent));
        push(Amortisation, "annual_roi_percent", "Yearly return on investment", Some("%"), self.annual_roi_percent.and_then(percent));
        push(Amortisation, "days_since_installation", "Days since installation", Some("d"), integer(self.days_since_installation));
        push(Amortisation, "days_tracking", "Days tracked", Some("d"), integer(self.days_tracking));
        push(Amortisation, "average_daily_savings", "Average daily savings", Some("€"), money(self.average_daily_savings));
        push(Amortisation, "average_monthly_savings", "Average monthly savings", Some("€"), money(self.average_monthly_savings));
        push(Amortisation, "average_yearly_savings", "Average yearly savings", Some("€"), money(self.average_yearly_savings));
        push(Amortisation, "estimated_remaining_days", "Estimated days to payback", Some("d"), self.estimated_remaining_days.and_then(integer));
        push(Amortisation, "estimated_payback_date", "Estimated payback date", None, self.estimated_payback_date.map(|date| date.to_string()));

        push(Energy, "pv_production", "Production counter", Some("kWh"), energy(self.pv_production));
        push(Energy, "grid_export", "Export counter", Some("kWh"), energy(self.grid_export));
        push(Energy, "grid_import", "Import counter", Some("kWh"), energy(self.grid_import));
        push(Energy, "consumption", "Consumption counter", Some("kWh"), self.consumption.and_then(energy));
        push(Energy, "self_consumption", "Self-consumed", Some("kWh"), energy(self.self_consumption));
        push(Energy, "feed_in", "Fed in", Some("kWh"), energy(self.feed_in));
        push(Energy, "self_consumption_ratio", "Self-consumption ratio", Some("%"), percent(self.self_consumption_ratio));
        push(Energy, "autarky_rate", "Autarky", Some("%"), self.autarky_rate.and_then(percent));
        push(Energy, "co2_saved", "CO2 saved", Some("kg"), Some(format!("{:.1}", self.co2_saved_kg)));

        push(Prices, "net_import_price", "Net import price", Some("€/kWh"), rate(self.net_import_price));
        push(Prices, "gross_import_price", "Gross import price", Some("€/kWh"), rate(self.gross_import_price));
        push(Prices, "feed_in_tariff", "Feed-in tariff", Some("€/kWh"), rate(self.export_tariff));
        push(Prices, "average_import_price", "Average import price", Some("€/kWh"), self.average_import_price.and_then(rate));
        push(Prices, "daily_average_import_price", "Average import price today", Some("€/kWh"), self.daily_average_import_price.and_then(rate));
        push(Prices, "monthly_average_import_price", "Average import price this month", Some("€/kWh"), self.monthly_average_import_price.and_then(rate));

        push(Windows, "daily_grid_import", "Imported today", Some("kWh"), energy(self.daily_grid_import));
        push(Windows, "daily_grid_import_cost", "Import cost today", Some("€"), money(self.daily_grid_import_cost));
        push(Windows, "daily_feed_in", "Fed in today", Some("kWh"), energy(self.daily_feed_in));
        push(Windows, "daily_feed_in_earnings", "Feed-in earnings today", Some("€"), money(self.daily_feed_in_earnings));
        push(Windows, "daily_net_cost", "Net electricity cost today", Some("€"), money(self.daily_net_cost));
        push(Windows, "monthly_grid_import", "Imported this month", Some("kWh"), energy(self.monthly_grid_import));
        push(Windows, "monthly_grid_import_cost", "Import cost this month", Some("€"), money(self.monthly_grid_import_cost));

        if let Some(quota) = &self.quota {
            push(Quota, "quota_consumed", "Quota consumed", Some("kWh"), energy(quota.consumed));
            push(Quota, "quota_consumed_percent", "Quota consumed", Some("%"), percent(quota.consumed_percent));
            push(Quota, "quota_remaining", "Quota remaining", Some("kWh"), energy(quota.remaining));
            push(Quota, "quota_expected", "Expected at linear pace", Some("kWh"), energy(quota.expected));
            push(Quota, "quota_reserve", "Reserve", Some("kWh"), energy(quota.reserve));
            push(Quota, "quota_daily_budget", "Daily budget", Some("kWh"), quota.daily_budget.and_then(energy));
            push(Quota, "quota_today_consumed", "Consumed today", Some("kWh"), energy(quota.today_consumed));
            push(Quota, "quota_today_remaining", "Remaining today", Some("kWh"), quota.today_remaining.and_then(energy));
            push(Quota, "quota_forecast", "Forecast at current pace", Some("kWh"), quota.forecast.and_then(energy));
            push(Quota, "quota_days_elapsed", "Days elapsed", Some("d"), integer(quota.days_elapsed));
            push(Quota, "quota_days_remaining", "Days remaining", Some("d"), integer(quota.days_remaining));
            push(Quota, "quota_end_date", "Period ends", None, Some(quota.end_date.to_string()));
            push(Quota, "quota_status", "Quota status", None, Some(quota.status.clone()));
        }

        if let Some(battery) = &self.battery {
            push(Battery, "battery_soc", "Battery state of charge", Some("%"), battery.state_of_charge.and_then(percent));
            push(Battery, "battery_charge_total", "Battery charged", Some("kWh"), battery.charge_total.and_then(energy));
            push(Battery, "battery_discharge_total", "Battery discharged", Some("kWh"), battery.discharge_total.and_then(energy));
            push(Battery, "battery_efficiency", "Battery efficiency", Some("%"), battery.efficiency_percent.and_then(percent));
            push(Battery, "battery_cycles", "Battery cycles", None, battery.estimated_cycles.map(|cycles| format!("{cycles:.1}")));
        }

        if let Some(benchmark) = &self.benchmark {
            push(Benchmark, "benchmark_reference", "Reference household", Some("kWh/a"), energy(benchmark.reference_household));
            push(Benchmark, "benchmark_own_total", "Own consumption", Some("kWh/a"), benchmark.own_annual_total.and_then(energy));
            push(Benchmark, "benchmark_household", "Household consumption", Some("kWh/a"), benchmark.own_household.and_then(energy));
            push(Benchmark, "benchmark_heat_pump_reference", "Reference heat pump", Some("kWh/a"), benchmark.reference_heat_pump.and_then(energy));
            push(Benchmark, "benchmark_heat_pump_own", "Own heat pump", Some("kWh/a"), benchmark.own_heat_pump.and_then(energy));
            push(Benchmark, "benchmark_annual_grid_import", "Grid import", Some("kWh/a"), benchmark.annual_grid_import.and_then(energy));
            push(Benchmark, "benchmark_annual_pv_production", "Production", Some("kWh/a"), benchmark.annual_pv_production.and_then(energy));
            push(Benchmark, "benchmark_specific_yield", "Specific yield", Some("kWh/kWp"), benchmark.specific_yield.map(|yield_| format!("{yield_:.0}")));
            push(Benchmark, "benchmark_comparison", "Versus reference", Some("%"), benchmark.consumption_vs_reference_percent.and_then(percent));
            push(Benchmark, "benchmark_heat_pump_comparison", "Heat pump versus reference", Some("%"), benchmark.heat_pump_vs_reference_percent.and_then(percent));
            push(Benchmark, "benchmark_co2_avoided", "CO2 avoided per year", Some("kg"), benchmark.annual_co2_avoided_kg.map(|kg| format!("{kg:.0}")));
            push(Benchmark, "benchmark_score", "Efficiency score", None, benchmark.efficiency_score.map(|score| score.to_string()));
            push(Benchmark, "benchmark_rating", "Rating", None, benchmark.rating.map(ToString::to_string));
        }

        for string in &self.strings {
            let slug = slugify(&string.name);
            push(Strings, &format!("string_{slug}_production"), &format!("{} production", string.name), Some("kWh"), energy(string.production));
            push(Strings, &format!("string_{slug}_daily"), &format!("{} daily average", string.name), Some("kWh/d"), string.daily_average.and_then(energy));
            push(Strings, &format!("string_{slug}_share"), &format!("{} share", string.name), Some("%"), string.share_percent.and_then(percent));
            push(Strings, &format!("string_{slug}_peak"), &format!("{} peak", string.name), Some("kW"), string.peak.and_then(power));
            push(Strings, &format!("string_{slug}_daily_peak"), &format!("{} peak today", string.name), Some("kW"), string.daily_peak.and_then(power));
            push(Strings, &format!("string_{slug}_specific_yield"), &format!("{} specific yield", string.name), Some("kWh/kWp"), string.specific_yield.map(|yield_| format!("{yield_:.0}")));
            push(Strings, &format!("string_{slug}_performance_ratio"), &format!("{} performance ratio", string.name), Some("%"), string.performance_ratio_percent.and_then(percent));
        }
        if let Some(totals) = &self.string_totals {
            push(Strings, "strings_daily_production", "Strings daily production", Some("kWh/d"), totals.daily_production.and_then(energy));
            push(Strings, "strings_peak", "Strings peak", Some("kW"), totals.peak.and_then(power));
            push(Strings, "strings_daily_peak", "Strings peak today", Some("kW"), totals.daily_peak.and_then(power));
        }

        rows
    }
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() {
                character.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn amortisation_is_bounded() {
        assert_abs_diff_eq!(amortisation_percent(Cost(2500.0), Cost(10000.0)), 25.0);
        assert_abs_diff_eq!(amortisation_percent(Cost(20000.0), Cost(10000.0)), 100.0);
        assert_abs_diff_eq!(amortisation_percent(Cost::ZERO, Cost(10000.0)), 0.0);
        assert_abs_diff_eq!(amortisation_percent(Cost::ZERO, Cost::ZERO), 100.0);
    }

    #[test]
    fn remaining_days_undefined_on_flat_trend() {
        assert_eq!(estimated_remaining_days(true, Cost::ZERO, Cost::ZERO), Some(0));
        assert_eq!(estimated_remaining_days(false, Cost(100.0), Cost::ZERO), None);
        assert_eq!(estimated_remaining_days(false, Cost(100.0), Cost(2.0)), Some(50));
    }

    #[test]
    fn autarky_prefers_the_consumption_signal() {
        let autarky = autarky_rate(
            KilowattHours(300.0),
            Some(KilowattHours(1000.0)),
            Some(KilowattHours(9999.0)),
        );
        assert_abs_diff_eq!(autarky.unwrap(), 30.0);
    }

    #[test]
    fn autarky_derives_consumption_from_import() {
        let autarky = autarky_rate(KilowattHours(300.0), None, Some(KilowattHours(700.0)));
        assert_abs_diff_eq!(autarky.unwrap(), 30.0);
    }

    #[test]
    fn autarky_is_undefined_without_signals() {
        assert_eq!(autarky_rate(KilowattHours(300.0), None, None), None);
        assert_eq!(autarky_rate(KilowattHours::ZERO, Some(KilowattHours(1000.0)), None), None);
    }

    fn quota_config(start_date: NaiveDate) -> QuotaConfig {
        QuotaConfig {
            yearly_budget: KilowattHours(4000.0),
            start_date: Some(start_date),
            start_meter: KilowattHours(1000.0),
            monthly_rate: Cost::ZERO,
        }
    }

    #[test]
    fn quota_scenario_over_budget() {
        let today = NaiveDate::from_ymd_opt(2025, 9, 17).unwrap();
        // 99 days before today, so the start day counts as day 100.
        let start = today - Days::new(99);
        let quota = quota_metrics(
            &quota_config(start),
            KilowattHours(1000.0),
            None,
            KilowattHours(2200.0),
            today,
        )
        .unwrap();

        assert_eq!(quota.days_elapsed, 100);
        assert_eq!(quota.days_remaining, 265);
        assert_abs_diff_eq!(quota.consumed.0, 1200.0);
        assert_abs_diff_eq!(quota.expected.0, 100.0 / 365.0 * 4000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(quota.reserve.0, quota.expected.0 - 1200.0, epsilon = 1e-9);
        assert!(quota.reserve < KilowattHours::ZERO);
        assert_abs_diff_eq!(quota.forecast.unwrap().0, 4380.0, epsilon = 1e-9);
        assert!(quota.status.starts_with("over budget"));
    }

    #[test]
    fn quota_before_the_start_date() {
        let today = NaiveDate::from_ymd_opt(2025, 9, 17).unwrap();
        let start = today + Days::new(10);
        let quota = quota_metrics(
            &quota_config(start),
            KilowattHours(1000.0),
            None,
            KilowattHours(1000.0),
            today,
        )
        .unwrap();
        assert_eq!(quota.days_elapsed, 0);
        assert_eq!(quota.expected, KilowattHours::ZERO);
        assert_eq!(quota.forecast, None);
    }

    #[test]
    fn quota_without_start_date_is_undefined() {
        let today = NaiveDate::from_ymd_opt(2025, 9, 17).unwrap();
        let config = QuotaConfig {
            yearly_budget: KilowattHours(4000.0),
            start_date: None,
            start_meter: KilowattHours::ZERO,
            monthly_rate: Cost::ZERO,
        };
        assert!(
            quota_metrics(&config, KilowattHours::ZERO, None, KilowattHours(500.0), today)
                .is_none()
        );
    }

    #[test]
    fn quota_today_is_meter_based() {
        let today = NaiveDate::from_ymd_opt(2025, 9, 17).unwrap();
        let start = today - Days::new(99);
        let quota = quota_metrics(
            &quota_config(start),
            KilowattHours(1000.0),
            Some(KilowattHours(2195.0)),
            KilowattHours(2200.0),
            today,
        )
        .unwrap();
        assert_abs_diff_eq!(quota.today_consumed.0, 5.0);
        let daily_budget = quota.daily_budget.unwrap();
        assert_abs_diff_eq!(quota.today_remaining.unwrap().0, daily_budget.0 - 5.0);
    }

    #[test]
    fn daily_budget_undefined_after_period_end() {
        let today = NaiveDate::from_ymd_opt(2026, 9, 17).unwrap();
        let start = today - Days::new(400);
        let quota = quota_metrics(
            &quota_config(start),
            KilowattHours(1000.0),
            None,
            KilowattHours(2200.0),
            today,
        )
        .unwrap();
        assert_eq!(quota.days_elapsed, 365);
        assert_eq!(quota.days_remaining, 0);
        assert_eq!(quota.daily_budget, None);
        assert_eq!(quota.today_remaining, None);
    }
}
