//! BudgetLedger: per-tenant current-period usage, append-only (SPEC_FULL §3, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageMetric {
    CpuSeconds,
    MemoryGbHours,
    EgressGb,
    Requests,
    Builds,
}

/// An append-only usage observation. Never edited after being written
/// (SPEC_FULL §3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetEvent {
    pub tenant_id: String,
    pub period: String,
    pub metric: UsageMetric,
    pub quantity: f64,
    pub cost: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Derived view: `summary = Σ events` (SPEC_FULL §8 invariant). Recomputed
/// by folding the event log; never mutated independently of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub tenant_id: String,
    pub period: String,
    pub total_cost: f64,
    pub quantities: std::collections::BTreeMap<String, f64>,
}

impl PeriodSummary {
    pub fn fold(tenant_id: &str, period: &str, events: &[BudgetEvent]) -> Self {
        let mut summary = PeriodSummary {
            tenant_id: tenant_id.to_string(),
            period: period.to_string(),
            total_cost: 0.0,
            quantities: Default::default(),
        };
        for event in events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.period == period)
        {
            summary.total_cost += event.cost;
            *summary
                .quantities
                .entry(format!("{:?}", event.metric))
                .or_insert(0.0) += event.quantity;
        }
        summary
    }
}

/// A fired threshold notification, recorded so `Admit` never emits the same
/// `budget.warning`/`budget.exceeded` event twice for the same period
/// (SPEC_FULL §4.8).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetThresholdSentinel {
    pub tenant_id: String,
    pub period: String,
    pub threshold_percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetCap {
    pub monthly_cap: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(tenant: &str, period: &str, cost: f64) -> BudgetEvent {
        BudgetEvent {
            tenant_id: tenant.into(),
            period: period.into(),
            metric: UsageMetric::CpuSeconds,
            quantity: 1.0,
            cost,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn summary_sums_events_for_tenant_and_period() {
        let events = vec![
            event("t1", "2026-07", 10.0),
            event("t1", "2026-07", 5.0),
            event("t2", "2026-07", 100.0),
            event("t1", "2026-06", 50.0),
        ];
        let summary = PeriodSummary::fold("t1", "2026-07", &events);
        assert_eq!(summary.total_cost, 15.0);
    }

    #[test]
    fn summary_is_reproducible_after_replay() {
        let events = vec![event("t1", "2026-07", 10.0), event("t1", "2026-07", 5.0)];
        let first = PeriodSummary::fold("t1", "2026-07", &events);
        let second = PeriodSummary::fold("t1", "2026-07", &events);
        assert_eq!(first.total_cost, second.total_cost);
    }
}
