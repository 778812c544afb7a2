//! Usage & Budget Gate: admits or rejects build/deploy/scale requests based
//! on running usage and monthly budget (SPEC_FULL §4.8). Grounded in
//! `admission.rs`'s `AdmissionVerdict`/`format_denial_message` shape
//! (allow/deny + human-readable reason) and its severity-threshold
//! filtering (`validate_pod_admission_with_severity`), generalized from
//! "pod violates policy" to "action exceeds budget".

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::config::BudgetConfig;
use crate::model::{
    event_types, BudgetCap, BudgetEvent, BudgetThresholdSentinel, PeriodSummary, ResourceRef,
};
use crate::events::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Build,
    Deploy,
    Scale,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Action::Build => "build",
            Action::Deploy => "deploy",
            Action::Scale => "scale",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionVerdict {
    pub allow: bool,
    pub reason: Option<String>,
}

impl AdmissionVerdict {
    fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: Some(reason.into()),
        }
    }
}

/// Tenants with no configured cap are treated as unlimited (fail-open),
/// mirroring `admission.rs`'s "no spec -> allow" fail-open stance for data
/// this gate was never given.
pub struct BudgetGate {
    events: Mutex<Vec<BudgetEvent>>,
    caps: Mutex<BTreeMap<String, BudgetCap>>,
    sentinels: Mutex<BTreeSet<BudgetThresholdSentinel>>,
    config: BudgetConfig,
}

impl BudgetGate {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            caps: Mutex::new(BTreeMap::new()),
            sentinels: Mutex::new(BTreeSet::new()),
            config,
        }
    }

    pub fn set_cap(&self, tenant_id: impl Into<String>, cap: BudgetCap) {
        self.caps.lock().unwrap().insert(tenant_id.into(), cap);
    }

    /// Append-only usage record (SPEC_FULL §3 invariant: never retroactively
    /// edited). Aggregation into the period summary happens by folding this
    /// log in `summary`, in a single pass per call, so `summary = Σ events`
    /// holds after every append regardless of crash timing.
    pub fn record_usage(&self, event: BudgetEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn summary(&self, tenant_id: &str, period: &str) -> PeriodSummary {
        let events = self.events.lock().unwrap();
        PeriodSummary::fold(tenant_id, period, &events)
    }

    /// `Admit(tenantId, action) -> {allow | deny, reason}` (SPEC_FULL §4.8).
    /// `projected_cost` is the admission-time cost estimate of `action`;
    /// denial compares `summary.total_cost + projected_cost` against the
    /// tenant's cap so a request is rejected before it can push the tenant
    /// over budget, not after.
    pub fn admit(
        &self,
        tenant_id: &str,
        period: &str,
        action: Action,
        projected_cost: f64,
        events: &EventBus,
    ) -> AdmissionVerdict {
        let Some(cap) = self.caps.lock().unwrap().get(tenant_id).copied() else {
            return AdmissionVerdict::allow();
        };

        let summary = self.summary(tenant_id, period);
        let projected_total = summary.total_cost + projected_cost;
        let critical_threshold =
            cap.monthly_cap * (self.config.critical_threshold_percent as f64 / 100.0);
        let warning_threshold =
            cap.monthly_cap * (self.config.warning_threshold_percent as f64 / 100.0);

        if projected_total > critical_threshold {
            self.notify_once(
                tenant_id,
                period,
                self.config.critical_threshold_percent,
                event_types::BUDGET_EXCEEDED,
                events,
            );
            return AdmissionVerdict::deny(format!(
                "BudgetExceeded: projected {:.2} exceeds cap {:.2} for tenant {tenant_id} action {}",
                projected_total,
                cap.monthly_cap,
                action.as_str()
            ));
        }

        if projected_total >= warning_threshold {
            self.notify_once(
                tenant_id,
                period,
                self.config.warning_threshold_percent,
                event_types::BUDGET_WARNING,
                events,
            );
        }

        AdmissionVerdict::allow()
    }

    /// Idempotent per `(tenant, period, threshold)` sentinel (SPEC_FULL
    /// §4.8): a threshold fires its event exactly once per period.
    fn notify_once(
        &self,
        tenant_id: &str,
        period: &str,
        threshold_percent: u8,
        event_type: &str,
        events: &EventBus,
    ) {
        let sentinel = BudgetThresholdSentinel {
            tenant_id: tenant_id.to_string(),
            period: period.to_string(),
            threshold_percent,
        };
        let newly_inserted = self.sentinels.lock().unwrap().insert(sentinel);
        if newly_inserted {
            events.publish(
                event_type,
                tenant_id,
                ResourceRef {
                    kind: "budget".into(),
                    id: period.to_string(),
                },
                serde_json::json!({ "thresholdPercent": threshold_percent }),
            );
        }
    }
}
