use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde_json::json;

use crate::quantity::{cost::Cost, energy::KilowattHours};

/// A structured event for the host's event bus.
///
/// Firing is fire-and-forget: a missed delivery is not re-attempted.
#[derive(Debug)]
pub enum Notification {
    AmortisationMilestone {
        milestone: u8,
        total_savings: Cost,
        remaining: Cost,
        installation_cost: Cost,
    },
    AmortisationComplete {
        total_savings: Cost,
        profit: Cost,
        installation_cost: Cost,
    },
    QuotaWarning80 {
        consumed_percent: f64,
        remaining: KilowattHours,
        reserve: KilowattHours,
    },
    QuotaWarning100 {
        consumed_percent: f64,
        yearly_budget: KilowattHours,
    },
    QuotaOverBudget {
        consumed_percent: f64,
        over_budget: KilowattHours,
    },
    MonthlySummary {
        year: i32,
        month: u32,
        grid_import: KilowattHours,
        grid_import_cost: Cost,
        amortisation_percent: f64,
        total_savings: Cost,
    },
}

impl Notification {
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::AmortisationMilestone { .. } => "amortisation_milestone",
            Self::AmortisationComplete { .. } => "amortisation_complete",
            Self::QuotaWarning80 { .. } => "quota_warning_80",
            Self::QuotaWarning100 { .. } => "quota_warning_100",
            Self::QuotaOverBudget { .. } => "quota_over_budget",
            Self::MonthlySummary { .. } => "monthly_summary",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::AmortisationMilestone { milestone, remaining, .. } => {
                format!("{milestone} % of the installation amortised, {remaining} to go")
            }
            Self::AmortisationComplete { profit, .. } => {
                format!("installation fully amortised, {profit} profit so far")
            }
            Self::QuotaWarning80 { remaining, .. } => {
                format!("80 % of the electricity quota consumed, {remaining} left")
            }
            Self::QuotaWarning100 { yearly_budget, .. } => {
                format!("electricity quota of {yearly_budget} fully consumed")
            }
            Self::QuotaOverBudget { over_budget, .. } => {
                format!("electricity quota exceeded by {over_budget}")
            }
            Self::MonthlySummary { year, month, grid_import, amortisation_percent, .. } => format!(
                "report for {year}-{month:02}: {grid_import} imported, {amortisation_percent:.1} % amortised",
            ),
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        let mut payload = match self {
            Self::AmortisationMilestone { milestone, total_savings, remaining, installation_cost } => {
                json!({
                    "milestone": milestone,
                    "total_savings": total_savings,
                    "remaining": remaining,
                    "installation_cost": installation_cost,
                })
            }
            Self::AmortisationComplete { total_savings, profit, installation_cost } => json!({
                "milestone": 100,
                "total_savings": total_savings,
                "profit": profit,
                "installation_cost": installation_cost,
            }),
            Self::QuotaWarning80 { consumed_percent, remaining, reserve } => json!({
                "consumed_percent": consumed_percent,
                "remaining_kwh": remaining,
                "reserve_kwh": reserve,
            }),
            Self::QuotaWarning100 { consumed_percent, yearly_budget } => json!({
                "consumed_percent": consumed_percent,
                "yearly_budget_kwh": yearly_budget,
            }),
            Self::QuotaOverBudget { consumed_percent, over_budget } => json!({
                "consumed_percent": consumed_percent,
                "over_budget_kwh": over_budget,
            }),
            Self::MonthlySummary {
                year,
                month,
                grid_import,
                grid_import_cost,
                amortisation_percent,
                total_savings,
            } => json!({
                "year": year,
                "month": month,
                "grid_import_kwh": grid_import,
                "grid_import_cost": grid_import_cost,
                "amortisation_percent": amortisation_percent,
                "total_savings": total_savings,
            }),
        };
        payload["type"] = json!(self.event_type());
        payload["message"] = json!(self.message());
        payload
    }
}

/// Idempotent, once-per-threshold firing state.
///
/// Latches survive restarts via the snapshot; only the explicit reset operations
/// re-arm them.
#[derive(Default)]
pub struct NotificationGate {
    pub milestones_fired: BTreeSet<u8>,
    pub quota_warning_80_sent: bool,
    pub quota_warning_100_sent: bool,
    pub quota_over_budget_sent: bool,
    pub summary_sent_for: Option<(i32, u32)>,
}

impl NotificationGate {
    pub const MILESTONES: [u8; 4] = [25, 50, 75, 100];

    /// Tolerance before the over-budget warning fires.
    const OVER_BUDGET_TOLERANCE: KilowattHours = KilowattHours(10.0);

    pub fn check_milestones(
        &mut self,
        amortisation_percent: f64,
        total_savings: Cost,
        remaining: Cost,
        installation_cost: Cost,
        out: &mut Vec<Notification>,
    ) {
        if installation_cost <= Cost::ZERO {
            return;
        }
        for milestone in Self::MILESTONES {
            if amortisation_percent >= f64::from(milestone)
                && self.milestones_fired.insert(milestone)
            {
                let notification = if milestone == 100 {
                    Notification::AmortisationComplete {
                        total_savings,
                        profit: total_savings - installation_cost,
                        installation_cost,
                    }
                } else {
                    Notification::AmortisationMilestone {
                        milestone,
                        total_savings,
                        remaining,
                        installation_cost,
                    }
                };
                out.push(notification);
            }
        }
    }

    pub fn check_quota(
        &mut self,
        consumed_percent: f64,
        remaining: KilowattHours,
        reserve: KilowattHours,
        yearly_budget: KilowattHours,
        out: &mut Vec<Notification>,
    ) {
        if consumed_percent >= 80.0 && !self.quota_warning_80_sent {
            self.quota_warning_80_sent = true;
            out.push(Notification::QuotaWarning80 { consumed_percent, remaining, reserve });
        }
        if consumed_percent >= 100.0 && !self.quota_warning_100_sent {
            self.quota_warning_100_sent = true;
            out.push(Notification::QuotaWarning100 { consumed_percent, yearly_budget });
        }
        if reserve < -Self::OVER_BUDGET_TOLERANCE && !self.quota_over_budget_sent {
            self.quota_over_budget_sent = true;
            out.push(Notification::QuotaOverBudget {
                consumed_percent,
                over_budget: -reserve,
            });
        }
    }

    /// The summary fires on the first update of the first day of a month, at most
    /// once per (year, month).
    pub fn check_monthly_summary(
        &mut self,
        today: NaiveDate,
        grid_import: KilowattHours,
        grid_import_cost: Cost,
        amortisation_percent: f64,
        total_savings: Cost,
        out: &mut Vec<Notification>,
    ) {
        if today.day() != 1 {
            return;
        }
        let key = (today.year(), today.month());
        if self.summary_sent_for == Some(key) {
            return;
        }
        self.summary_sent_for = Some(key);
        out.push(Notification::MonthlySummary {
            year: key.0,
            month: key.1,
            grid_import,
            grid_import_cost,
            amortisation_percent,
            total_savings,
        });
    }

    /// Re-arm the quota latches.
    pub const fn reset_quota(&mut self) {
        self.quota_warning_80_sent = false;
        self.quota_warning_100_sent = false;
        self.quota_over_budget_sent = false;
    }

    /// Re-arm the amortisation milestones.
    pub fn reset_milestones(&mut self) {
        self.milestones_fired.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestones_fire_once() {
        let mut gate = NotificationGate::default();
        let mut out = Vec::new();
        gate.check_milestones(55.0, Cost(5500.0), Cost(4500.0), Cost(10000.0), &mut out);
        assert_eq!(out.len(), 2); // 25 and 50 together.

        out.clear();
        gate.check_milestones(55.0, Cost(5500.0), Cost(4500.0), Cost(10000.0), &mut out);
        assert!(out.is_empty());

        gate.check_milestones(100.0, Cost(10100.0), Cost::ZERO, Cost(10000.0), &mut out);
        assert_eq!(out.len(), 2); // 75 and 100.
        assert!(matches!(out[1], Notification::AmortisationComplete { .. }));
    }

    #[test]
    fn milestones_require_installation_cost() {
        let mut gate = NotificationGate::default();
        let mut out = Vec::new();
        gate.check_milestones(100.0, Cost(1.0), Cost::ZERO, Cost::ZERO, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn quota_latches_are_independent() {
        let mut gate = NotificationGate::default();
        let mut out = Vec::new();
        gate.check_quota(85.0, KilowattHours(600.0), KilowattHours(-50.0), KilowattHours(4000.0), &mut out);
        assert_eq!(out.len(), 2); // 80 % and over-budget.

        out.clear();
        gate.check_quota(101.0, KilowattHours(-40.0), KilowattHours(-90.0), KilowattHours(4000.0), &mut out);
        assert_eq!(out.len(), 1); // only the 100 % warning is still armed.

        gate.reset_quota();
        out.clear();
        gate.check_quota(101.0, KilowattHours(-40.0), KilowattHours(-90.0), KilowattHours(4000.0), &mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn over_budget_respects_tolerance() {
        let mut gate = NotificationGate::default();
        let mut out = Vec::new();
        gate.check_quota(50.0, KilowattHours(2000.0), KilowattHours(-9.0), KilowattHours(4000.0), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn monthly_summary_once_per_month() {
        let mut gate = NotificationGate::default();
        let mut out = Vec::new();
        let first = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        gate.check_monthly_summary(first, KilowattHours(250.0), Cost(60.0), 42.0, Cost(4200.0), &mut out);
        assert_eq!(out.len(), 1);

        gate.check_monthly_summary(first, KilowattHours(250.0), Cost(60.0), 42.0, Cost(4200.0), &mut out);
        assert_eq!(out.len(), 1);

        // Not the first of the month: nothing fires.
        let mid = NaiveDate::from_ymd_opt(2025, 12, 15).unwrap();
        gate.check_monthly_summary(mid, KilowattHours::ZERO, Cost::ZERO, 42.0, Cost(4200.0), &mut out);
        assert_eq!(out.len(), 1);

        // A new month's first day fires again.
        let next = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        gate.check_monthly_summary(next, KilowattHours(100.0), Cost(25.0), 43.0, Cost(4300.0), &mut out);
        assert_eq!(out.len(), 2);
    }
}
