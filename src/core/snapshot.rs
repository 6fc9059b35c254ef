use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use toml::Value;

use crate::{
    core::engine::Tracker,
    prelude::*,
    quantity::{cost::Cost, energy::KilowattHours, power::Watts},
};

/// Restored heat pump totals above this are corrupted: most likely an absolute
/// meter reading that ended up stored as a delta total.
const HEAT_PUMP_SANITY_CEILING: f64 = 50_000.0;

/// Flat snapshot of every accumulator, plus the date tags needed to decide which
/// windows are still relevant on restore.
#[derive(Serialize)]
pub struct Snapshot {
    schema_version: u32,

    total_self_consumption_kwh: f64,
    total_feed_in_kwh: f64,
    accumulated_savings_self: f64,
    accumulated_earnings_feed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_seen_date: Option<NaiveDate>,

    tracked_grid_import_kwh: f64,
    total_grid_import_cost: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    daily_date: Option<NaiveDate>,
    daily_grid_import_kwh: f64,
    daily_grid_import_cost: f64,
    daily_feed_in_kwh: f64,
    daily_feed_in_earnings: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    monthly_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    monthly_month: Option<u32>,
    monthly_grid_import_kwh: f64,
    monthly_grid_import_cost: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    quota_day_start_meter: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quota_start_meter_captured: Option<f64>,

    heat_pump_tracked_kwh: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    heat_pump_first_seen_date: Option<NaiveDate>,

    milestones_fired: Vec<u8>,
    quota_warning_80_sent: bool,
    quota_warning_100_sent: bool,
    quota_over_budget_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary_month: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    string_first_seen_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    string_daily_peak_date: Option<NaiveDate>,
    string_tracked_kwh: BTreeMap<String, f64>,
    string_peak_w: BTreeMap<String, f64>,
    string_daily_peak_w: BTreeMap<String, f64>,
}

impl Snapshot {
    pub fn capture(tracker: &Tracker) -> Self {
        let acc = &tracker.state.acc;
        let gate = &tracker.state.gate;
        Self {
            schema_version: 1,
            total_self_consumption_kwh: acc.lifetime.self_consumption.0,
            total_feed_in_kwh: acc.lifetime.feed_in.0,
            accumulated_savings_self: acc.lifetime.savings_self.0,
            accumulated_earnings_feed: acc.lifetime.earnings_feed.0,
            first_seen_date: acc.lifetime.first_seen,
            tracked_grid_import_kwh: acc.import_tracking.tracked.0,
            total_grid_import_cost: acc.import_tracking.cost.0,
            daily_date: acc.daily.date,
            daily_grid_import_kwh: acc.daily.grid_import.0,
            daily_grid_import_cost: acc.daily.grid_import_cost.0,
            daily_feed_in_kwh: acc.daily.feed_in.0,
            daily_feed_in_earnings: acc.daily.feed_in_earnings.0,
            monthly_year: acc.monthly.key.map(|(year, _)| year),
            monthly_month: acc.monthly.key.map(|(_, month)| month),
            monthly_grid_import_kwh: acc.monthly.grid_import.0,
            monthly_grid_import_cost: acc.monthly.grid_import_cost.0,
            quota_day_start_meter: acc.quota.day_start_meter.map(|meter| meter.0),
            quota_start_meter_captured: acc.quota.captured_start_meter.map(|meter| meter.0),
            heat_pump_tracked_kwh: acc.heat_pump.tracked.0,
            heat_pump_first_seen_date: acc.heat_pump.first_seen,
            milestones_fired: gate.milestones_fired.iter().copied().collect(),
            quota_warning_80_sent: gate.quota_warning_80_sent,
            quota_warning_100_sent: gate.quota_warning_100_sent,
            quota_over_budget_sent: gate.quota_over_budget_sent,
            summary_year: gate.summary_sent_for.map(|(year, _)| year),
            summary_month: gate.summary_sent_for.map(|(_, month)| month),
            string_first_seen_date: acc.strings.first_seen,
            string_daily_peak_date: acc.strings.daily_peak_date,
            string_tracked_kwh: to_raw(&acc.strings.tracked, |energy| energy.0),
            string_peak_w: to_raw(&acc.strings.peak, |watts| watts.0),
            string_daily_peak_w: to_raw(&acc.strings.daily_peak, |watts| watts.0),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).context("failed to serialize the snapshot")
    }
}

fn to_raw<T: Copy>(map: &BTreeMap<String, T>, raw: impl Fn(T) -> f64) -> BTreeMap<String, f64> {
    map.iter().map(|(key, &value)| (key.clone(), raw(value))).collect()
}

/// Restore the accumulators from a snapshot document.
///
/// Parsing is defensive throughout: a missing or wrongly-typed field falls back to
/// its default instead of failing, window fields are only restored while their date
/// tags still match, and the lifetime accumulators restore unconditionally. Returns
/// whether anything was restored at all.
pub fn restore(tracker: &mut Tracker, document: &str, today: NaiveDate) -> bool {
    let table: toml::Table = match document.parse() {
        Ok(table) => table,
        Err(error) => {
            warn!("discarding an unreadable snapshot: {error:#}");
            return false;
        }
    };

    let state = &mut tracker.state;
    let acc = &mut state.acc;

    acc.lifetime.self_consumption = KilowattHours(float(&table, "total_self_consumption_kwh"));
    acc.lifetime.feed_in = KilowattHours(float(&table, "total_feed_in_kwh"));
    acc.lifetime.savings_self = Cost(float(&table, "accumulated_savings_self"));
    acc.lifetime.earnings_feed = Cost(float(&table, "accumulated_earnings_feed"));
    acc.lifetime.first_seen = date(&table, "first_seen_date");

    acc.import_tracking.tracked = KilowattHours(float(&table, "tracked_grid_import_kwh"));
    acc.import_tracking.cost = Cost(float(&table, "total_grid_import_cost"));

    if date(&table, "daily_date") == Some(today) {
        acc.daily.date = Some(today);
        acc.daily.grid_import = KilowattHours(float(&table, "daily_grid_import_kwh"));
        acc.daily.grid_import_cost = Cost(float(&table, "daily_grid_import_cost"));
        acc.daily.feed_in = KilowattHours(float(&table, "daily_feed_in_kwh"));
        acc.daily.feed_in_earnings = Cost(float(&table, "daily_feed_in_earnings"));
        if let Some(meter) = optional_float(&table, "quota_day_start_meter") {
            acc.quota.day_start_meter = Some(KilowattHours(meter));
        }
    }

    let monthly_key = month_key(&table, "monthly_year", "monthly_month");
    if monthly_key == Some((today.year(), today.month())) {
        acc.monthly.key = monthly_key;
        acc.monthly.grid_import = KilowattHours(float(&table, "monthly_grid_import_kwh"));
        acc.monthly.grid_import_cost = Cost(float(&table, "monthly_grid_import_cost"));
    }

    acc.quota.captured_start_meter =
        optional_float(&table, "quota_start_meter_captured").map(KilowattHours);

    let heat_pump_tracked = float(&table, "heat_pump_tracked_kwh");
    acc.heat_pump.tracked = if heat_pump_tracked < HEAT_PUMP_SANITY_CEILING {
        KilowattHours(heat_pump_tracked)
    } else {
        warn!(heat_pump_tracked, "discarding an implausible heat pump total");
        KilowattHours::ZERO
    };
    acc.heat_pump.first_seen = date(&table, "heat_pump_first_seen_date");

    let gate = &mut state.gate;
    gate.milestones_fired = milestones(&table);
    gate.quota_warning_80_sent = boolean(&table, "quota_warning_80_sent");
    gate.quota_warning_100_sent = boolean(&table, "quota_warning_100_sent");
    gate.quota_over_budget_sent = boolean(&table, "quota_over_budget_sent");
    gate.summary_sent_for = month_key(&table, "summary_year", "summary_month");

    acc.strings.first_seen = date(&table, "string_first_seen_date");
    acc.strings.tracked = float_map(&table, "string_tracked_kwh", KilowattHours);
    acc.strings.peak = float_map(&table, "string_peak_w", Watts);
    if date(&table, "string_daily_peak_date") == Some(today) {
        acc.strings.daily_peak_date = Some(today);
        acc.strings.daily_peak = float_map(&table, "string_daily_peak_w", Watts);
    }

    state.restored = true;
    state.revision += 1;
    info!(
        self_consumption = ?acc.lifetime.self_consumption,
        feed_in = ?acc.lifetime.feed_in,
        "restored the accumulators",
    );
    true
}

fn float(table: &toml::Table, key: &str) -> f64 {
    optional_float(table, key).unwrap_or_default()
}

fn optional_float(table: &toml::Table, key: &str) -> Option<f64> {
    match table.get(key) {
        Some(Value::Float(value)) => Some(*value),
        #[expect(clippy::cast_precision_loss)]
        Some(Value::Integer(value)) => Some(*value as f64),
        _ => None,
    }
}

fn integer(table: &toml::Table, key: &str) -> Option<i64> {
    table.get(key).and_then(Value::as_integer)
}

fn month_key(table: &toml::Table, year_key: &str, month_key: &str) -> Option<(i32, u32)> {
    let year = i32::try_from(integer(table, year_key)?).ok()?;
    let month = u32::try_from(integer(table, month_key)?).ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

fn boolean(table: &toml::Table, key: &str) -> bool {
    table.get(key).and_then(Value::as_bool).unwrap_or_default()
}

fn date(table: &toml::Table, key: &str) -> Option<NaiveDate> {
    table.get(key).and_then(Value::as_str).and_then(|value| value.parse().ok())
}

fn milestones(table: &toml::Table) -> std::collections::BTreeSet<u8> {
    table
        .get("milestones_fired")
        .and_then(Value::as_array)
        .map(|array| {
            array
                .iter()
                .filter_map(Value::as_integer)
                .filter_map(|milestone| u8::try_from(milestone).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn float_map<T>(
    table: &toml::Table,
    key: &str,
    wrap: impl Fn(f64) -> T,
) -> BTreeMap<String, T> {
    table
        .get(key)
        .and_then(Value::as_table)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(entity_id, value)| {
                    let value = match value {
                        Value::Float(value) => *value,
                        #[expect(clippy::cast_precision_loss)]
                        Value::Integer(value) => *value as f64,
                        _ => return None,
                    };
                    Some((entity_id.clone(), wrap(value)))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use chrono::Days;

    use super::*;
    use crate::core::config::{
        BatteryConfig,
        InvestmentConfig,
        PriceConfig,
        PriceUnit,
        TrackerConfig,
    };

    fn config() -> TrackerConfig {
        TrackerConfig {
            pv_production_entity: "sensor.pv_total".to_string(),
            grid_export_entity: Some("sensor.export_total".to_string()),
            grid_import_entity: Some("sensor.import_total".to_string()),
            consumption_entity: None,
            prices: PriceConfig {
                import_price: 0.125,
                import_price_unit: PriceUnit::Eur,
                import_price_entity: None,
                feed_in_tariff: 0.08,
                feed_in_tariff_unit: PriceUnit::Eur,
                feed_in_tariff_entity: None,
                markup_factor: 2.0,
            },
            investment: InvestmentConfig {
                installation_cost: Cost(10000.0),
                installation_date: None,
                savings_offset: Cost::ZERO,
                energy_offset_self: KilowattHours::ZERO,
                energy_offset_export: KilowattHours::ZERO,
            },
            quota: None,
            battery: BatteryConfig::default(),
            benchmark: None,
            strings: Vec::new(),
        }
    }

    fn tracker_with_history(on: NaiveDate) -> Tracker {
        let mut tracker = Tracker::new(config());
        for (pv, export, import) in [(1000.0, 300.0, 500.0), (1010.0, 303.0, 504.0)] {
            tracker.apply("sensor.pv_total", pv, on);
            tracker.apply("sensor.export_total", export, on);
            tracker.apply("sensor.import_total", import, on);
            tracker.commit_energy(on);
        }
        tracker
    }

    #[test]
    fn same_day_restore_round_trips() -> Result {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let source = tracker_with_history(today);
        let document = Snapshot::capture(&source).to_toml()?;

        let mut target = Tracker::new(config());
        assert!(restore(&mut target, &document, today));
        assert!(target.state.restored);

        let acc = &target.state.acc;
        assert_abs_diff_eq!(acc.lifetime.self_consumption.0, 7.0);
        assert_abs_diff_eq!(acc.lifetime.savings_self.0, 1.75);
        assert_abs_diff_eq!(acc.daily.grid_import.0, 4.0);
        assert_eq!(acc.daily.date, Some(today));
        assert_abs_diff_eq!(acc.import_tracking.tracked.0, 4.0);
        Ok(())
    }

    #[test]
    fn stale_daily_window_is_zeroed_but_lifetime_survives() -> Result {
        let yesterday = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let today = yesterday + Days::new(1);
        let source = tracker_with_history(yesterday);
        let document = Snapshot::capture(&source).to_toml()?;

        let mut target = Tracker::new(config());
        assert!(restore(&mut target, &document, today));

        let acc = &target.state.acc;
        assert_eq!(acc.daily.grid_import, KilowattHours::ZERO);
        assert_eq!(acc.daily.date, None);
        assert_eq!(acc.quota.day_start_meter, None);
        // The lifetime accumulators are preserved exactly.
        assert_abs_diff_eq!(acc.lifetime.self_consumption.0, 7.0);
        assert_abs_diff_eq!(acc.lifetime.feed_in.0, 3.0);
        assert_abs_diff_eq!(acc.import_tracking.cost.0, 1.0);
        Ok(())
    }

    #[test]
    fn stale_monthly_window_is_zeroed() -> Result {
        let june = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let july = NaiveDate::from_ymd_opt(2025, 7, 3).unwrap();
        let source = tracker_with_history(june);
        let document = Snapshot::capture(&source).to_toml()?;

        let mut target = Tracker::new(config());
        assert!(restore(&mut target, &document, july));
        assert_eq!(target.state.acc.monthly.grid_import, KilowattHours::ZERO);
        assert_eq!(target.state.acc.monthly.key, None);
        Ok(())
    }

    #[test]
    fn malformed_fields_default_to_zero() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let document = r#"
            total_self_consumption_kwh = "garbage"
            total_feed_in_kwh = 120.5
            accumulated_savings_self = true
            first_seen_date = "not-a-date"
            milestones_fired = [25, "fifty", 5000]
        "#;
        let mut tracker = Tracker::new(config());
        assert!(restore(&mut tracker, document, today));

        let acc = &tracker.state.acc;
        assert_eq!(acc.lifetime.self_consumption, KilowattHours::ZERO);
        assert_abs_diff_eq!(acc.lifetime.feed_in.0, 120.5);
        assert_eq!(acc.lifetime.savings_self, Cost::ZERO);
        assert_eq!(acc.lifetime.first_seen, None);
        assert_eq!(tracker.state.gate.milestones_fired, std::collections::BTreeSet::from([25]));
    }

    #[test]
    fn unreadable_document_restores_nothing() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let mut tracker = Tracker::new(config());
        assert!(!restore(&mut tracker, "[[[ not toml", today));
        assert!(!tracker.state.restored);
    }

    #[test]
    fn implausible_heat_pump_total_is_discarded() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let document = "heat_pump_tracked_kwh = 61234.0";
        let mut tracker = Tracker::new(config());
        assert!(restore(&mut tracker, document, today));
        assert_eq!(tracker.state.acc.heat_pump.tracked, KilowattHours::ZERO);
    }

    #[test]
    fn notification_latches_survive_the_round_trip() -> Result {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let mut source = tracker_with_history(today);
        source.state.gate.milestones_fired.extend([25, 50]);
        source.state.gate.quota_warning_80_sent = true;
        source.state.gate.summary_sent_for = Some((2025, 6));
        let document = Snapshot::capture(&source).to_toml()?;

        let mut target = Tracker::new(config());
        assert!(restore(&mut target, &document, today));
        let gate = &target.state.gate;
        assert_eq!(gate.milestones_fired, std::collections::BTreeSet::from([25, 50]));
        assert!(gate.quota_warning_80_sent);
        assert!(!gate.quota_warning_100_sent);
        assert_eq!(gate.summary_sent_for, Some((2025, 6)));
        Ok(())
    }
}

