//! Rolling strategy: the simplest rollout, apply the new revision in place
//! at full replica count, then observe the health gate before committing
//! (SPEC_FULL §4.4: "Rolling: apply, observe, commit-or-rollback"). Grounded
//! in the same `apply -> wait-for-ready -> evaluate` shape this ecosystem's
//! reconcile loop uses for applying a single workload.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::gateway::OrchestratorGateway;
use crate::health::{evaluate_tick, MetricsSource, Verdict};
use crate::model::{AttemptState, DeploymentAttempt, FailureReason, ServiceSpec};

use super::{pod_spec_for, RolloutStrategy, StepOutcome, StrategyError};

pub struct RollingStrategy;

#[async_trait]
impl RolloutStrategy for RollingStrategy {
    fn name(&self) -> &'static str {
        "rolling"
    }

    async fn step(
        &self,
        spec: &ServiceSpec,
        attempt: &mut DeploymentAttempt,
        gateway: &dyn OrchestratorGateway,
        metrics: &dyn MetricsSource,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, StrategyError> {
        match attempt.state {
            AttemptState::Pending => {
                let pod_spec = pod_spec_for(spec, spec.autoscale.min.max(1));
                gateway
                    .apply_workload(&attempt.tenant_id, &spec.name, "current", pod_spec)
                    .await?;
                attempt.current_weight = 100;
                attempt
                    .transition(AttemptState::Validating, now)
                    .map_err(StrategyError::HealthGateFailed)?;
                Ok(StepOutcome::Continue)
            }
            AttemptState::Validating => {
                let handle = crate::gateway::WorkloadHandle {
                    tenant_id: attempt.tenant_id.clone(),
                    name: spec.name.clone(),
                    version: "current".to_string(),
                };
                let status = gateway.get_workload_status(&handle).await?;
                if !status.is_stale() && status.ready == status.replicas {
                    attempt
                        .transition(AttemptState::Observing, now)
                        .map_err(StrategyError::HealthGateFailed)?;
                }
                Ok(StepOutcome::Continue)
            }
            AttemptState::Observing => {
                if !spec.health_gate.enabled {
                    attempt
                        .commit(now)
                        .map_err(StrategyError::HealthGateFailed)?;
                    return Ok(StepOutcome::Committed);
                }
                let samples = metrics.samples(spec.health_gate.window_seconds);
                let verdict = evaluate_tick(
                    samples.last(),
                    &spec.health_gate,
                    &mut attempt.consecutive_bad_windows,
                );
                match verdict {
                    Verdict::Unhealthy => {
                        attempt
                            .roll_back(FailureReason::HealthGateFailed, now)
                            .map_err(StrategyError::HealthGateFailed)?;
                        Ok(StepOutcome::RolledBack)
                    }
                    Verdict::Healthy => {
                        attempt
                            .commit(now)
                            .map_err(StrategyError::HealthGateFailed)?;
                        Ok(StepOutcome::Committed)
                    }
                    Verdict::Unknown => Ok(StepOutcome::Continue),
                }
            }
            _ => Ok(StepOutcome::Continue),
        }
    }
}
