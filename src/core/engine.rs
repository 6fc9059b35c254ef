use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};

use crate::{
    core::{
        config::TrackerConfig,
        delta::{DeltaTracker, HEAT_PUMP_CEILING, MAIN_CHANNEL_CEILING},
        metrics::{self, Metrics},
        notify::{Notification, NotificationGate},
        price::PriceResolver,
        readings::Readings,
    },
    prelude::*,
    quantity::{cost::Cost, energy::KilowattHours, power::Watts},
};

/// Lifetime accumulators: the system of record. Monotonically non-decreasing.
#[derive(Default)]
pub struct Lifetime {
    pub self_consumption: KilowattHours,
    pub feed_in: KilowattHours,
    pub savings_self: Cost,
    pub earnings_feed: Cost,
    pub first_seen: Option<NaiveDate>,
}

/// Consumption-weighted import price tracking.
#[derive(Default)]
pub struct ImportTracking {
    pub tracked: KilowattHours,
    pub cost: Cost,
}

/// Today's window, zeroed lazily on the first update after a date change.
#[derive(Default)]
pub struct DailyWindow {
    pub date: Option<NaiveDate>,
    pub grid_import: KilowattHours,
    pub grid_import_cost: Cost,
    pub feed_in: KilowattHours,
    pub feed_in_earnings: Cost,
}

/// This month's window, keyed by (year, month) to survive clock jumps across years.
#[derive(Default)]
pub struct MonthlyWindow {
    pub key: Option<(i32, u32)>,
    pub grid_import: KilowattHours,
    pub grid_import_cost: Cost,
}

/// Quota bookkeeping that must survive restarts.
#[derive(Default)]
pub struct QuotaTracking {
    /// Import meter reading captured at the start of today, for a restart-proof
    /// "consumed today".
    pub day_start_meter: Option<KilowattHours>,
    /// Auto-captured period start meter, used when the configured one is zero.
    pub captured_start_meter: Option<KilowattHours>,
}

#[derive(Default)]
pub struct HeatPumpTracking {
    pub tracked: KilowattHours,
    pub first_seen: Option<NaiveDate>,
}

/// Per-string production counters and power peaks, keyed by entity id.
#[derive(Default)]
pub struct StringTracking {
    pub tracked: BTreeMap<String, KilowattHours>,
    pub first_seen: Option<NaiveDate>,
    pub peak: BTreeMap<String, Watts>,
    pub daily_peak: BTreeMap<String, Watts>,
    pub daily_peak_date: Option<NaiveDate>,
}

#[derive(Default)]
pub struct Accumulators {
    pub lifetime: Lifetime,
    pub import_tracking: ImportTracking,
    pub daily: DailyWindow,
    pub monthly: MonthlyWindow,
    pub quota: QuotaTracking,
    pub heat_pump: HeatPumpTracking,
    pub strings: StringTracking,
}

/// Mutable tracker state, separate from the configuration so that observers can
/// borrow both.
pub struct TrackerState {
    pub readings: Readings,
    pub prices: PriceResolver,
    pub acc: Accumulators,
    pub gate: NotificationGate,
    pub restored: bool,
    /// Bumped on every committed update; lets the publisher skip idle ticks.
    pub revision: u64,

    pv: DeltaTracker,
    export: DeltaTracker,
    import: DeltaTracker,
    heat_pump: DeltaTracker,
    strings: HashMap<String, DeltaTracker>,

    events: Vec<Notification>,
    dirty: bool,
    energy_pending: bool,
}

/// Observers are notified synchronously after every committed update. A failing
/// observer must not abort its siblings or the update that triggered it.
pub type Observer = Box<dyn FnMut(&TrackerConfig, &TrackerState) -> Result + Send>;

pub struct Tracker {
    pub config: TrackerConfig,
    pub state: TrackerState,
    observers: Vec<Observer>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        let strings = config
            .strings
            .iter()
            .map(|string| {
                (string.energy_entity.clone(), DeltaTracker::new(MAIN_CHANNEL_CEILING))
            })
            .collect();
        let state = TrackerState {
            readings: Readings::default(),
            prices: PriceResolver::default(),
            acc: Accumulators::default(),
            gate: NotificationGate::default(),
            restored: false,
            revision: 0,
            pv: DeltaTracker::new(MAIN_CHANNEL_CEILING),
            export: DeltaTracker::new(MAIN_CHANNEL_CEILING),
            import: DeltaTracker::new(MAIN_CHANNEL_CEILING),
            heat_pump: DeltaTracker::new(HEAT_PUMP_CEILING),
            strings,
            events: Vec::new(),
            dirty: false,
            energy_pending: false,
        };
        Self { config, state, observers: Vec::new() }
    }

    pub fn add_observer(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    /// Drain the queued notifications; the caller delivers them out of band so a
    /// slow event bus never blocks the update path.
    pub fn take_events(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.state.events)
    }

    /// True when the accumulators changed since the last snapshot was taken.
    pub const fn is_dirty(&self) -> bool {
        self.state.dirty
    }

    pub const fn mark_clean(&mut self) {
        self.state.dirty = false;
    }

    pub fn metrics(&self, today: NaiveDate) -> Metrics {
        metrics::collect(&self.config, &self.state, today)
    }

    /// Route one changed entity value.
    ///
    /// The three main energy channels are not accounted immediately: their counters
    /// arrive as separate notifications, and subtracting an export delta from a
    /// production delta only makes sense once the whole batch is in. The caller
    /// feeds every change of a batch and then calls [`Tracker::commit_energy`].
    pub fn apply(&mut self, entity_id: &str, value: f64, today: NaiveDate) {
        self.state.readings.insert(entity_id, value);
        if self.state.acc.lifetime.first_seen.is_none() {
            self.state.acc.lifetime.first_seen = Some(today);
        }

        if entity_id == self.config.pv_production_entity
            || self.config.grid_export_entity.as_deref() == Some(entity_id)
            || self.config.grid_import_entity.as_deref() == Some(entity_id)
        {
            self.state.prices.observe(&self.config.prices, &self.state.readings);
            self.state.energy_pending = true;
        } else if self.config.consumption_entity.as_deref() == Some(entity_id) {
            // The consumption signal only feeds derived ratios.
        } else if self.config.prices.import_price_entity.as_deref() == Some(entity_id)
            || self.config.prices.feed_in_tariff_entity.as_deref() == Some(entity_id)
        {
            self.state.prices.observe(&self.config.prices, &self.state.readings);
        } else if self.config.heat_pump_entity() == Some(entity_id) {
            self.apply_heat_pump(value, today);
        } else if self.config.is_string_energy(entity_id) {
            self.apply_string_energy(entity_id, value, today);
        } else if self.config.is_string_power(entity_id) {
            self.apply_string_power(entity_id, value, today);
        } else if self.config.battery.soc_entity.as_deref() == Some(entity_id)
            || self.config.battery.charge_entity.as_deref() == Some(entity_id)
            || self.config.battery.discharge_entity.as_deref() == Some(entity_id)
        {
            self.after_update(today);
        }
    }

    /// Account the pending main-channel movements as one atomic update: all
    /// accumulator mutations for the batch commit before this returns.
    pub fn commit_energy(&mut self, today: NaiveDate) {
        if self.state.energy_pending {
            self.state.energy_pending = false;
            self.process_energy_update(today);
        }
    }

    fn process_energy_update(&mut self, today: NaiveDate) {
        let state = &mut self.state;
        let config = &self.config;

        let pv_reading = state.readings.value(&config.pv_production_entity);
        let export_reading = state.readings.of(config.grid_export_entity.as_deref());
        let import_reading = state.readings.of(config.grid_import_entity.as_deref());

        let delta_pv = pv_reading.map_or(KilowattHours::ZERO, |value| state.pv.advance(value));
        let delta_export =
            export_reading.map_or(KilowattHours::ZERO, |value| state.export.advance(value));
        let delta_import =
            import_reading.map_or(KilowattHours::ZERO, |value| state.import.advance(value));

        // Exported energy cannot exceed production within one interval, but clamp
        // anyway: the two counters update at slightly different moments.
        let delta_self = (delta_pv - delta_export).max(KilowattHours::ZERO);

        Self::roll_over_windows(&mut state.acc, import_reading, today);

        if delta_self > KilowattHours::ZERO || delta_export > KilowattHours::ZERO {
            let gross_price = state.prices.gross_import_price(&config.prices, &state.readings);
            let tariff = state.prices.export_tariff(&config.prices, &state.readings);
            let savings_delta = delta_self * gross_price;
            let earnings_delta = delta_export * tariff;

            state.acc.lifetime.self_consumption += delta_self;
            state.acc.lifetime.feed_in += delta_export;
            state.acc.lifetime.savings_self += savings_delta;
            state.acc.lifetime.earnings_feed += earnings_delta;
            state.acc.daily.feed_in += delta_export;
            state.acc.daily.feed_in_earnings += earnings_delta;
        }

        if delta_import > KilowattHours::ZERO {
            let cost =
                delta_import * state.prices.gross_import_price(&config.prices, &state.readings);
            state.acc.import_tracking.tracked += delta_import;
            state.acc.import_tracking.cost += cost;
            state.acc.daily.grid_import += delta_import;
            state.acc.daily.grid_import_cost += cost;
            state.acc.monthly.grid_import += delta_import;
            state.acc.monthly.grid_import_cost += cost;
        }

        self.after_update(today);
    }

    /// Zero stale day and month windows before the current delta is applied.
    fn roll_over_windows(acc: &mut Accumulators, import_reading: Option<f64>, today: NaiveDate) {
        if acc.daily.date != Some(today) {
            acc.daily = DailyWindow { date: Some(today), ..DailyWindow::default() };
            if let Some(meter) = import_reading.filter(|&meter| meter > 0.0) {
                acc.quota.day_start_meter = Some(KilowattHours(meter));
            }
        }
        let month_key = (today.year(), today.month());
        if acc.monthly.key != Some(month_key) {
            acc.monthly = MonthlyWindow { key: Some(month_key), ..MonthlyWindow::default() };
        }
    }

    fn apply_heat_pump(&mut self, value: f64, today: NaiveDate) {
        let state = &mut self.state;
        if state.acc.heat_pump.first_seen.is_none() {
            state.acc.heat_pump.first_seen = Some(today);
        }
        let delta = state.heat_pump.advance(value);
        if delta > KilowattHours::ZERO {
            state.acc.heat_pump.tracked += delta;
        }
        self.after_update(today);
    }

    fn apply_string_energy(&mut self, entity_id: &str, value: f64, today: NaiveDate) {
        let state = &mut self.state;
        if state.acc.strings.first_seen.is_none() {
            state.acc.strings.first_seen = Some(today);
        }
        let delta = state
            .strings
            .get_mut(entity_id)
            .map_or(KilowattHours::ZERO, |tracker| tracker.advance(value));
        if delta > KilowattHours::ZERO {
            *state.acc.strings.tracked.entry(entity_id.to_string()).or_default() += delta;
        }
        self.after_update(today);
    }

    fn apply_string_power(&mut self, entity_id: &str, value: f64, today: NaiveDate) {
        let strings = &mut self.state.acc.strings;
        let value = Watts(value);
        let peak = strings.peak.entry(entity_id.to_string()).or_default();
        if value > *peak {
            *peak = value;
        }
        if strings.daily_peak_date != Some(today) {
            strings.daily_peak.clear();
            strings.daily_peak_date = Some(today);
        }
        let daily_peak = strings.daily_peak.entry(entity_id.to_string()).or_default();
        if value > *daily_peak {
            *daily_peak = value;
        }
        self.after_update(today);
    }

    /// Post-update hook, in fixed order: observers, persistence marking, milestone
    /// check, quota warnings, monthly summary.
    fn after_update(&mut self, today: NaiveDate) {
        self.state.revision += 1;

        let Self { config, state, observers } = self;
        for observer in observers {
            if let Err(error) = observer(config, state) {
                warn!("observer failed (ignored): {error:#}");
            }
        }

        state.dirty = true;

        let metrics = metrics::collect(config, state, today);
        let mut events = std::mem::take(&mut state.events);
        state.gate.check_milestones(
            metrics.amortisation_percent,
            metrics.total_savings,
            metrics.remaining_cost,
            config.investment.installation_cost,
            &mut events,
        );
        if let Some(quota) = &metrics.quota {
            state.gate.check_quota(
                quota.consumed_percent,
                quota.remaining,
                quota.reserve,
                quota.yearly_budget,
                &mut events,
            );
        }
        state.gate.check_monthly_summary(
            today,
            state.acc.monthly.grid_import,
            state.acc.monthly.grid_import_cost,
            metrics.amortisation_percent,
            metrics.total_savings,
            &mut events,
        );
        state.events = events;
    }

    /// One-time seeding from the currently observed absolute totals, used when no
    /// valid snapshot exists: all historical production counts as self-consumed
    /// minus exported, priced at today's gross price and tariff.
    pub fn bootstrap_from_totals(&mut self, today: NaiveDate) -> bool {
        let state = &mut self.state;
        let config = &self.config;
        let pv_total = KilowattHours(
            state.readings.value(&config.pv_production_entity).unwrap_or_default(),
        );
        if pv_total <= KilowattHours::ZERO {
            info!("no historical production data, starting from zero");
            return false;
        }
        let export_total = state.readings.total(config.grid_export_entity.as_deref());
        let self_consumption = (pv_total - export_total).max(KilowattHours::ZERO);

        let gross_price = state.prices.gross_import_price(&config.prices, &state.readings);
        let tariff = state.prices.export_tariff(&config.prices, &state.readings);

        state.acc.lifetime.self_consumption = self_consumption;
        state.acc.lifetime.feed_in = export_total;
        state.acc.lifetime.savings_self = self_consumption * gross_price;
        state.acc.lifetime.earnings_feed = export_total * tariff;
        state.acc.lifetime.first_seen = Some(today);
        info!(
            self_consumption = ?self_consumption,
            feed_in = ?export_total,
            "seeded the accumulators from the current totals",
        );
        self.after_update(today);
        true
    }

    /// Capture the quota period start meter once, when the configuration leaves it
    /// at zero and the period has started.
    pub fn capture_quota_start_meter(&mut self, today: NaiveDate) {
        let Some(quota) = &self.config.quota else { return };
        let Some(start_date) = quota.start_date else { return };
        if quota.start_meter > KilowattHours::ZERO
            || self.state.acc.quota.captured_start_meter.is_some()
            || today < start_date
        {
            return;
        }
        let import_total = self.state.readings.total(self.config.grid_import_entity.as_deref());
        if import_total > KilowattHours::ZERO {
            info!(meter = ?import_total, "captured the quota start meter");
            self.state.acc.quota.captured_start_meter = Some(import_total);
            self.state.dirty = true;
        }
    }

    /// Destructive: zero the grid import tracking (lifetime, daily and monthly) and
    /// re-arm the quota warnings.
    pub fn reset_grid_import(&mut self, today: NaiveDate) {
        let state = &mut self.state;
        info!(
            tracked = ?state.acc.import_tracking.tracked,
            cost = ?state.acc.import_tracking.cost,
            "resetting the grid import tracking",
        );
        state.acc.import_tracking = ImportTracking::default();
        state.acc.daily.grid_import = KilowattHours::ZERO;
        state.acc.daily.grid_import_cost = Cost::ZERO;
        state.acc.monthly.grid_import = KilowattHours::ZERO;
        state.acc.monthly.grid_import_cost = Cost::ZERO;
        if let Some(reading) = state.readings.of(self.config.grid_import_entity.as_deref()) {
            state.import.rebase(reading);
        }
        state.gate.reset_quota();
        self.after_update(today);
    }

    /// Destructive: zero the benchmark and heat pump tracking.
    pub fn reset_benchmark(&mut self, today: NaiveDate) {
        let state = &mut self.state;
        info!(tracked = ?state.acc.heat_pump.tracked, "resetting the benchmark tracking");
        state.acc.heat_pump = HeatPumpTracking::default();
        state.heat_pump.clear();
        state.acc.lifetime.first_seen = None;
        self.after_update(today);
    }

    /// Destructive: zero all per-string counters and peaks.
    pub fn reset_strings(&mut self, today: NaiveDate) {
        info!("resetting the string tracking");
        self.state.acc.strings = StringTracking::default();
        for tracker in self.state.strings.values_mut() {
            tracker.clear();
        }
        self.after_update(today);
    }

    /// Destructive: discard the lifetime accumulators and seed them afresh from the
    /// current totals. Also re-arms the amortisation milestones.
    pub fn rebootstrap(&mut self, today: NaiveDate) -> bool {
        info!("re-seeding the accumulators from the current totals");
        self.state.acc.lifetime = Lifetime::default();
        self.state.gate.reset_milestones();
        self.bootstrap_from_totals(today)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::core::config::{
        BatteryConfig,
        InvestmentConfig,
        PriceConfig,
        PriceUnit,
        QuotaConfig,
    };

    pub fn test_config() -> TrackerConfig {
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

    pub fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
    }

    fn feed(tracker: &mut Tracker, pv: f64, export: f64, import: f64, on: NaiveDate) {
        tracker.apply("sensor.pv_total", pv, on);
        tracker.apply("sensor.export_total", export, on);
        tracker.apply("sensor.import_total", import, on);
        tracker.commit_energy(on);
    }

    #[test]
    fn basic_accounting_scenario() {
        let mut tracker = Tracker::new(test_config());
        feed(&mut tracker, 1000.0, 300.0, 500.0, today());
        // Gross price 0.25 €/kWh, tariff 0.08 €/kWh; 10 kWh produced, 3 exported.
        feed(&mut tracker, 1010.0, 303.0, 500.0, today());

        let lifetime = &tracker.state.acc.lifetime;
        assert_abs_diff_eq!(lifetime.self_consumption.0, 7.0);
        assert_abs_diff_eq!(lifetime.feed_in.0, 3.0);
        assert_abs_diff_eq!(lifetime.savings_self.0, 1.75);
        assert_abs_diff_eq!(lifetime.earnings_feed.0, 0.24);
        let metrics = tracker.metrics(today());
        assert_abs_diff_eq!(metrics.total_savings.0, 1.99, epsilon = 1e-9);
    }

    #[test]
    fn import_is_priced_into_all_windows() {
        let mut tracker = Tracker::new(test_config());
        feed(&mut tracker, 0.0, 0.0, 100.0, today());
        feed(&mut tracker, 0.0, 0.0, 104.0, today());

        let acc = &tracker.state.acc;
        assert_abs_diff_eq!(acc.import_tracking.tracked.0, 4.0);
        assert_abs_diff_eq!(acc.import_tracking.cost.0, 1.0);
        assert_abs_diff_eq!(acc.daily.grid_import.0, 4.0);
        assert_abs_diff_eq!(acc.monthly.grid_import.0, 4.0);
    }

    #[test]
    fn day_rollover_zeroes_daily_window_and_captures_meter() {
        let mut tracker = Tracker::new(test_config());
        let day_one = today();
        let day_two = day_one.succ_opt().unwrap();
        feed(&mut tracker, 0.0, 0.0, 100.0, day_one);
        feed(&mut tracker, 0.0, 0.0, 105.0, day_one);
        assert_abs_diff_eq!(tracker.state.acc.daily.grid_import.0, 5.0);

        feed(&mut tracker, 0.0, 0.0, 107.0, day_two);
        let acc = &tracker.state.acc;
        assert_abs_diff_eq!(acc.daily.grid_import.0, 2.0);
        assert_eq!(acc.daily.date, Some(day_two));
        // The day-start meter holds the first reading seen today, so "consumed
        // today" stays meter-based across restarts.
        assert_abs_diff_eq!(acc.quota.day_start_meter.unwrap().0, 107.0);
        // Lifetime totals keep accumulating across the boundary.
        assert_abs_diff_eq!(acc.import_tracking.tracked.0, 7.0);
    }

    #[test]
    fn month_rollover_is_keyed_by_year_and_month() {
        let mut tracker = Tracker::new(test_config());
        let december = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        let january = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        feed(&mut tracker, 0.0, 0.0, 100.0, december);
        feed(&mut tracker, 0.0, 0.0, 110.0, december);
        assert_abs_diff_eq!(tracker.state.acc.monthly.grid_import.0, 10.0);

        feed(&mut tracker, 0.0, 0.0, 113.0, january);
        assert_eq!(tracker.state.acc.monthly.key, Some((2026, 1)));
        assert_abs_diff_eq!(tracker.state.acc.monthly.grid_import.0, 3.0);
    }

    #[test]
    fn counter_reset_does_not_corrupt_lifetime() {
        let mut tracker = Tracker::new(test_config());
        feed(&mut tracker, 500.0, 100.0, 0.0, today());
        feed(&mut tracker, 510.0, 102.0, 0.0, today());
        let before = tracker.state.acc.lifetime.self_consumption;

        // The production meter is replaced and restarts near zero.
        tracker.apply("sensor.pv_total", 0.3, today());
        tracker.commit_energy(today());
        assert_eq!(tracker.state.acc.lifetime.self_consumption, before);

        tracker.apply("sensor.pv_total", 1.3, today());
        tracker.commit_energy(today());
        assert_abs_diff_eq!(tracker.state.acc.lifetime.self_consumption.0, before.0 + 1.0);
    }

    #[test]
    fn bootstrap_treats_history_as_self_consumed_minus_exported() {
        let mut tracker = Tracker::new(test_config());
        feed(&mut tracker, 1000.0, 200.0, 0.0, today());
        assert!(tracker.bootstrap_from_totals(today()));

        let lifetime = &tracker.state.acc.lifetime;
        assert_abs_diff_eq!(lifetime.self_consumption.0, 800.0);
        assert_abs_diff_eq!(lifetime.feed_in.0, 200.0);
        assert_abs_diff_eq!(lifetime.savings_self.0, 800.0 * 0.25);
        assert_abs_diff_eq!(lifetime.earnings_feed.0, 200.0 * 0.08);
        assert_eq!(lifetime.first_seen, Some(today()));
    }

    #[test]
    fn bootstrap_without_production_is_a_no_op() {
        let mut tracker = Tracker::new(test_config());
        assert!(!tracker.bootstrap_from_totals(today()));
        assert_eq!(tracker.state.acc.lifetime.self_consumption, KilowattHours::ZERO);
    }

    #[test]
    fn observers_run_after_each_update_and_failures_are_isolated() {
        use std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        };

        let mut tracker = Tracker::new(test_config());
        let calls = Arc::new(AtomicUsize::new(0));
        tracker.add_observer(Box::new(|_, _| bail!("observer is broken")));
        let counter = Arc::clone(&calls);
        tracker.add_observer(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }));

        feed(&mut tracker, 10.0, 0.0, 0.0, today());
        feed(&mut tracker, 11.0, 0.0, 0.0, today());
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_abs_diff_eq!(tracker.state.acc.lifetime.self_consumption.0, 1.0);
    }

    #[test]
    fn milestone_events_fire_once_per_lifetime() {
        let mut config = test_config();
        config.investment.installation_cost = Cost(4.0);
        let mut tracker = Tracker::new(config);
        feed(&mut tracker, 100.0, 0.0, 0.0, today());
        // 8 kWh self-consumed at 0.25 €/kWh gross: 2 € saved, 50 % amortised.
        feed(&mut tracker, 108.0, 0.0, 0.0, today());

        let events = tracker.take_events();
        assert_eq!(events.len(), 2); // 25 % and 50 %.

        // The same level again: nothing new fires.
        feed(&mut tracker, 108.001, 0.0, 0.0, today());
        assert!(tracker.take_events().is_empty());

        // Crossing 100 % fires 75 % and the completion event.
        feed(&mut tracker, 118.0, 0.0, 0.0, today());
        let events = tracker.take_events();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn quota_start_meter_is_captured_once() {
        let mut config = test_config();
        config.quota = Some(QuotaConfig {
            yearly_budget: KilowattHours(4000.0),
            start_date: Some(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()),
            start_meter: KilowattHours::ZERO,
            monthly_rate: Cost::ZERO,
        });
        let mut tracker = Tracker::new(config);
        feed(&mut tracker, 0.0, 0.0, 1234.5, today());
        tracker.capture_quota_start_meter(today());
        assert_abs_diff_eq!(tracker.state.acc.quota.captured_start_meter.unwrap().0, 1234.5);

        feed(&mut tracker, 0.0, 0.0, 1300.0, today());
        tracker.capture_quota_start_meter(today());
        assert_abs_diff_eq!(tracker.state.acc.quota.captured_start_meter.unwrap().0, 1234.5);
    }

    #[test]
    fn reset_grid_import_keeps_savings() {
        let mut tracker = Tracker::new(test_config());
        feed(&mut tracker, 100.0, 10.0, 1000.0, today());
        feed(&mut tracker, 110.0, 12.0, 1010.0, today());
        let savings = tracker.state.acc.lifetime.savings_self;

        tracker.reset_grid_import(today());
        let acc = &tracker.state.acc;
        assert_eq!(acc.import_tracking.tracked, KilowattHours::ZERO);
        assert_eq!(acc.daily.grid_import, KilowattHours::ZERO);
        assert_eq!(acc.monthly.grid_import, KilowattHours::ZERO);
        assert_eq!(acc.lifetime.savings_self, savings);

        // The next import delta starts from the rebased baseline.
        feed(&mut tracker, 110.0, 12.0, 1013.0, today());
        assert_abs_diff_eq!(tracker.state.acc.import_tracking.tracked.0, 3.0);
    }

    #[test]
    fn string_tracking_is_isolated_from_savings() {
        use crate::core::config::StringConfig;

        let mut config = test_config();
        config.strings = vec![StringConfig {
            name: "South".to_string(),
            energy_entity: "sensor.pv_south_energy".to_string(),
            power_entity: Some("sensor.pv_south_power".to_string()),
            rated_capacity: None,
        }];
        let mut tracker = Tracker::new(config);

        tracker.apply("sensor.pv_south_energy", 100.0, today());
        tracker.apply("sensor.pv_south_energy", 104.5, today());
        assert_abs_diff_eq!(
            tracker.state.acc.strings.tracked["sensor.pv_south_energy"].0,
            4.5
        );
        assert_eq!(tracker.state.acc.lifetime.self_consumption, KilowattHours::ZERO);

        tracker.apply("sensor.pv_south_power", 3200.0, today());
        tracker.apply("sensor.pv_south_power", 2800.0, today());
        assert_eq!(tracker.state.acc.strings.peak["sensor.pv_south_power"], Watts(3200.0));

        // Daily peaks reset on the next day, lifetime peaks do not.
        let tomorrow = today().succ_opt().unwrap();
        tracker.apply("sensor.pv_south_power", 2500.0, tomorrow);
        assert_eq!(tracker.state.acc.strings.daily_peak["sensor.pv_south_power"], Watts(2500.0));
        assert_eq!(tracker.state.acc.strings.peak["sensor.pv_south_power"], Watts(3200.0));
    }

    #[test]
    fn heat_pump_tracking_uses_its_own_ceiling() {
        use crate::core::benchmark::Country;
        use crate::core::config::BenchmarkConfig;

        let mut config = test_config();
        config.benchmark = Some(BenchmarkConfig {
            household_size: 3,
            country: Country::At,
            heat_pump: true,
            heat_pump_entity: Some("sensor.heat_pump_energy".to_string()),
        });
        let mut tracker = Tracker::new(config);

        tracker.apply("sensor.heat_pump_energy", 5000.0, today());
        tracker.apply("sensor.heat_pump_energy", 5150.0, today());
        assert_abs_diff_eq!(tracker.state.acc.heat_pump.tracked.0, 150.0);

        // An absolute total injected as a delta is discarded.
        tracker.apply("sensor.heat_pump_energy", 25000.0, today());
        assert_abs_diff_eq!(tracker.state.acc.heat_pump.tracked.0, 150.0);
    }
}
