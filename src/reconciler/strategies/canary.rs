//! Canary strategy: run the new revision alongside the stable one at a
//! growing traffic share, observing the health gate at each step
//! (SPEC_FULL §4.4: "Canary: apply canary at ceil(initialWeight% x
//! replicas), program route, observe; on healthy, step 25 -> 50 -> 75 -> 100
//! with per-step observation; on unhealthy, revert and delete canary").
//! Grounded in the stepped-promotion shape of the `RolloutStrategy`
//! `compute_next_status` pattern used for canary/blue-green elsewhere in
//! this ecosystem, generalized to a fixed quartile schedule. Traffic is
//! shifted through `TrafficSplitter` so each step's `dwell_seconds`
//! (SPEC_FULL §7, §9) gates the next promotion via `attempt.resume_at`
//! instead of being applied immediately.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::gateway::{OrchestratorGateway, WorkloadHandle};
use crate::health::{evaluate_tick, MetricsSource, Verdict};
use crate::model::{AttemptState, DeploymentAttempt, FailureReason, ServiceSpec, TrafficStep};
use crate::traffic::TrafficSplitter;

use super::{pod_spec_for, RolloutStrategy, StepOutcome, StrategyError};

const STEP_SCHEDULE: [u8; 4] = [25, 50, 75, 100];

fn canary_replicas(desired: u32, initial_weight: u8) -> u32 {
    let replicas = (desired as u64 * initial_weight as u64).div_ceil(100);
    replicas.max(1) as u32
}

fn stable_handle(attempt: &DeploymentAttempt) -> WorkloadHandle {
    WorkloadHandle {
        tenant_id: attempt.tenant_id.clone(),
        name: attempt.service_name.clone(),
        version: "stable".to_string(),
    }
}

fn canary_handle(attempt: &DeploymentAttempt) -> WorkloadHandle {
    WorkloadHandle {
        tenant_id: attempt.tenant_id.clone(),
        name: attempt.service_name.clone(),
        version: "canary".to_string(),
    }
}

/// Applies a weight immediately with no dwell: used for the initial canary
/// weight (observation there is gated by the health-gate window, not a
/// timer) and for reverting to 0 on rollback.
async fn program_weights(
    gateway: &dyn OrchestratorGateway,
    spec: &ServiceSpec,
    attempt: &DeploymentAttempt,
    canary_weight: u8,
) -> Result<(), StrategyError> {
    gateway
        .program_route(crate::gateway::RouteProgram {
            service: spec.name.clone(),
            backends: vec![
                crate::gateway::RouteBackend {
                    handle: stable_handle(attempt),
                    weight: 100 - canary_weight,
                },
                crate::gateway::RouteBackend {
                    handle: canary_handle(attempt),
                    weight: canary_weight,
                },
            ],
            ports: spec.ports.clone(),
        })
        .await
        .map_err(StrategyError::from)
}

pub struct CanaryStrategy;

#[async_trait]
impl RolloutStrategy for CanaryStrategy {
    fn name(&self) -> &'static str {
        "canary"
    }

    async fn step(
        &self,
        spec: &ServiceSpec,
        attempt: &mut DeploymentAttempt,
        gateway: &dyn OrchestratorGateway,
        metrics: &dyn MetricsSource,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, StrategyError> {
        let splitter = TrafficSplitter::new(gateway);
        let params = spec
            .strategy
            .canary
            .ok_or(StrategyError::MissingParams(spec.strategy.kind))?;

        match attempt.state {
            AttemptState::Pending => {
                let desired = spec.autoscale.min.max(1);
                if attempt.from_revision.is_none() {
                    let stable_spec = pod_spec_for(spec, desired);
                    gateway
                        .apply_workload(&attempt.tenant_id, &spec.name, "stable", stable_spec)
                        .await?;
                }
                let canary_spec = pod_spec_for(spec, canary_replicas(desired, params.initial_weight));
                gateway
                    .apply_workload(&attempt.tenant_id, &spec.name, "canary", canary_spec)
                    .await?;
                program_weights(gateway, spec, attempt, params.initial_weight).await?;
                attempt.current_weight = params.initial_weight;
                attempt.traffic_program = STEP_SCHEDULE
                    .iter()
                    .copied()
                    .filter(|&w| w > params.initial_weight)
                    .map(|weight| TrafficStep {
                        weight,
                        dwell_seconds: params.observation_time_seconds,
                    })
                    .collect();
                attempt
                    .transition(AttemptState::Observing, now)
                    .map_err(StrategyError::HealthGateFailed)?;
                Ok(StepOutcome::Continue)
            }
            AttemptState::Observing => {
                if attempt.is_dwelling(now) {
                    return Ok(StepOutcome::Continue);
                }
                if !spec.health_gate.enabled {
                    return self.promote_or_commit(spec, attempt, gateway, &splitter, now).await;
                }
                let samples = metrics.samples(spec.health_gate.window_seconds);
                let verdict = evaluate_tick(
                    samples.last(),
                    &spec.health_gate,
                    &mut attempt.consecutive_bad_windows,
                );
                match verdict {
                    Verdict::Unhealthy => {
                        gateway.delete_workload(&canary_handle(attempt)).await?;
                        program_weights(gateway, spec, attempt, 0).await?;
                        attempt.resume_at = None;
                        attempt
                            .roll_back(FailureReason::HealthGateFailed, now)
                            .map_err(StrategyError::HealthGateFailed)?;
                        Ok(StepOutcome::RolledBack)
                    }
                    Verdict::Healthy => {
                        if !params.auto_promote {
                            return Ok(StepOutcome::Continue);
                        }
                        self.promote_or_commit(spec, attempt, gateway, &splitter, now).await
                    }
                    Verdict::Unknown => Ok(StepOutcome::Continue),
                }
            }
            _ => Ok(StepOutcome::Continue),
        }
    }
}

impl CanaryStrategy {
    /// Pops the next `TrafficStep`, shifts traffic to it through
    /// `TrafficSplitter`, and records the returned dwell deadline on
    /// `attempt.resume_at` so the following tick's `is_dwelling` check holds
    /// promotion until the step's `dwell_seconds` have elapsed.
    async fn promote_or_commit(
        &self,
        spec: &ServiceSpec,
        attempt: &mut DeploymentAttempt,
        gateway: &dyn OrchestratorGateway,
        splitter: &TrafficSplitter<'_>,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, StrategyError> {
        match attempt.traffic_program.first().copied() {
            Some(step) => {
                attempt.traffic_program.remove(0);
                let desired = spec.autoscale.min.max(1);
                gateway
                    .scale_workload(&canary_handle(attempt), canary_replicas(desired, step.weight))
                    .await?;
                let resume_at = splitter
                    .shift(
                        &spec.name,
                        stable_handle(attempt),
                        canary_handle(attempt),
                        step.weight,
                        std::time::Duration::from_secs(step.dwell_seconds as u64),
                        now,
                    )
                    .await?;
                attempt.current_weight = step.weight;
                if step.weight >= 100 {
                    gateway.delete_workload(&stable_handle(attempt)).await?;
                    attempt.resume_at = None;
                    attempt
                        .commit(now)
                        .map_err(StrategyError::HealthGateFailed)?;
                    return Ok(StepOutcome::Committed);
                }
                attempt.resume_at = Some(resume_at);
                Ok(StepOutcome::Continue)
            }
            None => {
                gateway.delete_workload(&stable_handle(attempt)).await?;
                attempt.resume_at = None;
                attempt
                    .commit(now)
                    .map_err(StrategyError::HealthGateFailed)?;
                Ok(StepOutcome::Committed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use crate::health::{FixedMetricsSource, MetricSample};
    use crate::model::{
        AutoscaleSpec, CanaryParams, HealthCheckSpec, HealthGateSpec, ResourceSpec, StrategyKind,
        StrategySpec,
    };
    use std::collections::BTreeMap;

    fn spec(initial_weight: u8, auto_promote: bool) -> ServiceSpec {
        ServiceSpec {
            tenant_id: "t1".into(),
            name: "svc-a".into(),
            image: "img@sha256:aaa".into(),
            ports: vec![8080],
            env: BTreeMap::new(),
            resources: ResourceSpec {
                cpu: "100m".into(),
                memory: "256Mi".into(),
                cpu_limit: None,
                memory_limit: None,
            },
            autoscale: AutoscaleSpec {
                min: 4,
                max: 4,
                cpu: 70,
                rps: 100,
            },
            health_check: HealthCheckSpec {
                path: "/healthz".into(),
                port: 8080,
                initial_delay_seconds: 0,
                period_seconds: 10,
            },
            strategy: StrategySpec {
                kind: StrategyKind::Canary,
                canary: Some(CanaryParams {
                    initial_weight,
                    observation_time_seconds: 1,
                    auto_promote,
                }),
                blue_green: None,
            },
            health_gate: HealthGateSpec {
                enabled: true,
                max_error_rate: 0.01,
                max_p95_latency_ms: 500,
                min_success_rate: 0.99,
                window_seconds: 60,
                failure_threshold: 1,
            },
        }
    }

    fn good_source() -> FixedMetricsSource {
        FixedMetricsSource {
            bucket_seconds: 60,
            samples: vec![MetricSample {
                requests: 100,
                errors: 0,
                p95_latency_ms: 50,
                bucket_start: Utc::now(),
            }],
        }
    }

    #[tokio::test]
    async fn promotes_through_quartiles_to_full_commit() {
        let gateway = InMemoryGateway::new();
        let metrics = good_source();
        let spec = spec(10, true);
        let mut attempt = DeploymentAttempt::new(
            "t1",
            "svc-a",
            None,
            1,
            spec.target_hash(),
            StrategyKind::Canary,
            Utc::now(),
        );
        let strategy = CanaryStrategy;
        let mut now = Utc::now();

        strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
        assert_eq!(attempt.state, AttemptState::Observing);
        assert_eq!(attempt.current_weight, 10);

        let mut outcome = StepOutcome::Continue;
        for _ in 0..5 {
            // Each quartile dwells for observation_time_seconds; advance the
            // clock past it so the next tick is eligible to promote.
            now += chrono::Duration::seconds(2);
            outcome = strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
            if outcome == StepOutcome::Committed {
                break;
            }
        }
        assert_eq!(outcome, StepOutcome::Committed);
        assert_eq!(attempt.current_weight, 100);
    }

    #[tokio::test]
    async fn promotion_blocked_until_dwell_elapses() {
        let gateway = InMemoryGateway::new();
        let metrics = good_source();
        let spec = spec(10, true);
        let mut attempt = DeploymentAttempt::new(
            "t1",
            "svc-a",
            None,
            1,
            spec.target_hash(),
            StrategyKind::Canary,
            Utc::now(),
        );
        let strategy = CanaryStrategy;
        let now = Utc::now();

        strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
        strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
        assert_eq!(attempt.current_weight, 25);

        let outcome = strategy
            .step(&spec, &mut attempt, &gateway, &metrics, now)
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(attempt.current_weight, 25, "promotion must wait for the dwell to elapse");

        let outcome = strategy
            .step(&spec, &mut attempt, &gateway, &metrics, now + chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(attempt.current_weight, 50);
    }

    #[tokio::test]
    async fn rolls_back_and_deletes_canary_on_unhealthy() {
        let gateway = InMemoryGateway::new();
        let bad_source = FixedMetricsSource {
            bucket_seconds: 60,
            samples: vec![MetricSample {
                requests: 100,
                errors: 90,
                p95_latency_ms: 50,
                bucket_start: Utc::now(),
            }],
        };
        let spec = spec(10, true);
        let mut attempt = DeploymentAttempt::new(
            "t1",
            "svc-a",
            None,
            1,
            spec.target_hash(),
            StrategyKind::Canary,
            Utc::now(),
        );
        let strategy = CanaryStrategy;
        let now = Utc::now();
        strategy.step(&spec, &mut attempt, &gateway, &bad_source, now).await.unwrap();
        let outcome = strategy.step(&spec, &mut attempt, &gateway, &bad_source, now).await.unwrap();
        assert_eq!(outcome, StepOutcome::RolledBack);

        let canary = canary_handle(&attempt);
        assert!(gateway.get_workload_status(&canary).await.is_err());
    }
}
