//! Strategy dispatch for rollout reconciliation (SPEC_FULL §4.4, §9:
//! "Polymorphic strategies... modeled as a tagged variant... dispatch is a
//! switch inside the reconciler"). Grounded directly in the `RolloutStrategy`
//! trait + `select_strategy` free function used for canary/blue-green/simple
//! rollout dispatch elsewhere in this ecosystem.

pub mod blue_green;
pub mod canary;
pub mod rolling;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use std::collections::BTreeMap;

use crate::error::GatewayError;
use crate::gateway::{OrchestratorGateway, PodSpec};
use crate::health::MetricsSource;
use crate::model::{DeploymentAttempt, EnvValue, ServiceSpec, StrategyKind};

/// Builds the `PodSpec` a workload is applied with. Secret-backed env values
/// are resolved out of scope (SPEC_FULL §1 non-goals: no concrete secret
/// store binding), so they are passed through as a `secret:<name>` reference
/// for the gateway adapter to resolve.
pub(super) fn pod_spec_for(spec: &ServiceSpec, replicas: u32) -> PodSpec {
    let env = spec
        .env
        .iter()
        .map(|(k, v)| {
            let value = match v {
                EnvValue::Literal(s) => s.clone(),
                EnvValue::FromSecret { from_secret } => format!("secret:{from_secret}"),
            };
            (k.clone(), value)
        })
        .collect::<BTreeMap<_, _>>();
    PodSpec {
        image: spec.image.clone(),
        ports: spec.ports.clone(),
        env,
        replicas,
    }
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("health gate failed: {0}")]
    HealthGateFailed(String),
    #[error("missing strategy params for {0:?}")]
    MissingParams(StrategyKind),
}

/// One tick's worth of strategy work: drive `attempt` one step further and
/// report whether the attempt is done (committed or rolled back).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Committed,
    RolledBack,
}

#[async_trait]
pub trait RolloutStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Executes one reconciler tick's worth of strategy-specific work:
    /// apply/scale workloads, shift traffic, evaluate the health gate, and
    /// advance `attempt`'s state. Implementations persist `attempt`'s new
    /// state (via the caller, after returning) before any further
    /// non-idempotent side effect, consistent with SPEC_FULL §4.4's
    /// crash-safety rule. `now` is threaded in by the caller (rather than
    /// read via `Utc::now()` here) so the reconciler's tick clock is the
    /// single source of truth a traffic shift dwell is measured against.
    async fn step(
        &self,
        spec: &ServiceSpec,
        attempt: &mut DeploymentAttempt,
        gateway: &dyn OrchestratorGateway,
        metrics: &dyn MetricsSource,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, StrategyError>;
}

pub fn select_strategy(kind: StrategyKind) -> Box<dyn RolloutStrategy> {
    match kind {
        StrategyKind::Rolling => Box::new(rolling::RollingStrategy),
        StrategyKind::Canary => Box::new(canary::CanaryStrategy),
        StrategyKind::BlueGreen => Box::new(blue_green::BlueGreenStrategy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_strategy_maps_each_kind() {
        assert_eq!(select_strategy(StrategyKind::Rolling).name(), "rolling");
        assert_eq!(select_strategy(StrategyKind::Canary).name(), "canary");
        assert_eq!(select_strategy(StrategyKind::BlueGreen).name(), "blue-green");
    }
}
