//! Blue-green strategy: stand up the new revision ("green") fully alongside
//! the running one ("blue"), wait for it to become ready, shift traffic per
//! `switchStrategy`, validate, then retire blue (SPEC_FULL §4.4: "apply full
//! green, wait ready == desired, shift to 100% green per switchStrategy,
//! validate, delete blue or revert"). Grounded in the `BlueGreenStrategyHandler`
//! pattern (`reconcile_replicasets` / `reconcile_traffic` / `compute_next_status`)
//! used for blue-green rollouts elsewhere in this ecosystem. A gradual switch's
//! per-quartile shifts go through `TrafficSplitter`, which returns a dwell
//! deadline the Shifting-state handler persists on `attempt.resume_at`
//! (SPEC_FULL §7, §9) before it will pop the next step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::gateway::{OrchestratorGateway, RouteBackend, RouteProgram, WorkloadHandle};
use crate::health::{evaluate_tick, MetricsSource, Verdict};
use crate::model::{AttemptState, DeploymentAttempt, FailureReason, ServiceSpec, SwitchStrategy, TrafficStep};
use crate::traffic::TrafficSplitter;

use super::{pod_spec_for, RolloutStrategy, StepOutcome, StrategyError};

fn blue_handle(attempt: &DeploymentAttempt) -> WorkloadHandle {
    WorkloadHandle {
        tenant_id: attempt.tenant_id.clone(),
        name: attempt.service_name.clone(),
        version: "blue".to_string(),
    }
}

fn green_handle(attempt: &DeploymentAttempt) -> WorkloadHandle {
    WorkloadHandle {
        tenant_id: attempt.tenant_id.clone(),
        name: attempt.service_name.clone(),
        version: "green".to_string(),
    }
}

async fn program_weights(
    gateway: &dyn OrchestratorGateway,
    spec: &ServiceSpec,
    attempt: &DeploymentAttempt,
    green_weight: u8,
) -> Result<(), StrategyError> {
    gateway
        .program_route(RouteProgram {
            service: spec.name.clone(),
            backends: vec![
                RouteBackend {
                    handle: blue_handle(attempt),
                    weight: 100 - green_weight,
                },
                RouteBackend {
                    handle: green_handle(attempt),
                    weight: green_weight,
                },
            ],
            ports: spec.ports.clone(),
        })
        .await
        .map_err(StrategyError::from)
}

pub struct BlueGreenStrategy;

#[async_trait]
impl RolloutStrategy for BlueGreenStrategy {
    fn name(&self) -> &'static str {
        "blue-green"
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
            .blue_green
            .ok_or(StrategyError::MissingParams(spec.strategy.kind))?;

        match attempt.state {
            AttemptState::Pending => {
                let desired = spec.autoscale.min.max(1);
                if attempt.from_revision.is_none() {
                    let blue_spec = pod_spec_for(spec, desired);
                    gateway
                        .apply_workload(&attempt.tenant_id, &spec.name, "blue", blue_spec)
                        .await?;
                    program_weights(gateway, spec, attempt, 0).await?;
                }
                let green_spec = pod_spec_for(spec, desired);
                gateway
                    .apply_workload(&attempt.tenant_id, &spec.name, "green", green_spec)
                    .await?;
                attempt
                    .transition(AttemptState::Validating, now)
                    .map_err(StrategyError::HealthGateFailed)?;
                Ok(StepOutcome::Continue)
            }
            AttemptState::Validating => {
                let status = gateway.get_workload_status(&green_handle(attempt)).await?;
                if !status.is_stale() && status.ready == status.replicas {
                    attempt.traffic_program = match params.switch_strategy {
                        SwitchStrategy::Immediate => vec![TrafficStep {
                            weight: 100,
                            dwell_seconds: 0,
                        }],
                        SwitchStrategy::Gradual => {
                            let steps = 4u32;
                            let dwell = params.switch_duration_seconds / steps;
                            [25u8, 50, 75, 100]
                                .into_iter()
                                .map(|weight| TrafficStep {
                                    weight,
                                    dwell_seconds: dwell,
                                })
                                .collect()
                        }
                    };
                    attempt
                        .transition(AttemptState::Shifting, now)
                        .map_err(StrategyError::HealthGateFailed)?;
                }
                Ok(StepOutcome::Continue)
            }
            AttemptState::Shifting => {
                if attempt.is_dwelling(now) {
                    return Ok(StepOutcome::Continue);
                }
                match attempt.traffic_program.first().copied() {
                    Some(step) => {
                        attempt.traffic_program.remove(0);
                        let resume_at = splitter
                            .shift(
                                &spec.name,
                                blue_handle(attempt),
                                green_handle(attempt),
                                step.weight,
                                std::time::Duration::from_secs(step.dwell_seconds as u64),
                                now,
                            )
                            .await?;
                        attempt.current_weight = step.weight;
                        if step.weight >= 100 {
                            attempt.resume_at = None;
                            attempt
                                .transition(AttemptState::Observing, now)
                                .map_err(StrategyError::HealthGateFailed)?;
                        } else {
                            attempt.resume_at = Some(resume_at);
                        }
                        Ok(StepOutcome::Continue)
                    }
                    None => {
                        attempt.resume_at = None;
                        attempt
                            .transition(AttemptState::Observing, now)
                            .map_err(StrategyError::HealthGateFailed)?;
                        Ok(StepOutcome::Continue)
                    }
                }
            }
            AttemptState::Observing => {
                if !spec.health_gate.enabled {
                    gateway.delete_workload(&blue_handle(attempt)).await?;
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
                        if params.rollback_on_error {
                            program_weights(gateway, spec, attempt, 0).await?;
                        }
                        gateway.delete_workload(&green_handle(attempt)).await?;
                        attempt
                            .roll_back(FailureReason::HealthGateFailed, now)
                            .map_err(StrategyError::HealthGateFailed)?;
                        Ok(StepOutcome::RolledBack)
                    }
                    Verdict::Healthy => {
                        gateway.delete_workload(&blue_handle(attempt)).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use crate::health::{FixedMetricsSource, MetricSample};
    use crate::model::{
        AutoscaleSpec, BlueGreenParams, HealthCheckSpec, HealthGateSpec, ResourceSpec,
        StrategyKind, StrategySpec,
    };
    use std::collections::BTreeMap;

    fn spec(switch_strategy: SwitchStrategy) -> ServiceSpec {
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
                min: 2,
                max: 2,
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
                kind: StrategyKind::BlueGreen,
                canary: None,
                blue_green: Some(BlueGreenParams {
                    switch_strategy,
                    switch_duration_seconds: 4,
                    validation_period_seconds: 30,
                    rollback_on_error: true,
                }),
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
    async fn immediate_switch_commits_after_one_shift() {
        let gateway = InMemoryGateway::new();
        let metrics = good_source();
        let spec = spec(SwitchStrategy::Immediate);
        let mut attempt = DeploymentAttempt::new(
            "t1",
            "svc-a",
            None,
            1,
            spec.target_hash(),
            StrategyKind::BlueGreen,
            Utc::now(),
        );
        let strategy = BlueGreenStrategy;
        let now = Utc::now();

        strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap(); // Pending -> Validating
        strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap(); // Validating -> Shifting
        assert_eq!(attempt.state, AttemptState::Shifting);
        strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap(); // Shifting -> Observing
        assert_eq!(attempt.state, AttemptState::Observing);
        assert_eq!(attempt.current_weight, 100);

        let outcome = strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
        assert_eq!(outcome, StepOutcome::Committed);
        assert!(gateway.get_workload_status(&blue_handle(&attempt)).await.is_err());
    }

    #[tokio::test]
    async fn gradual_switch_steps_through_quartiles() {
        let gateway = InMemoryGateway::new();
        let metrics = good_source();
        let spec = spec(SwitchStrategy::Gradual);
        let mut attempt = DeploymentAttempt::new(
            "t1",
            "svc-a",
            None,
            1,
            spec.target_hash(),
            StrategyKind::BlueGreen,
            Utc::now(),
        );
        let strategy = BlueGreenStrategy;
        let mut now = Utc::now();
        strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
        strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
        assert_eq!(attempt.traffic_program.len(), 4);

        for _ in 0..4 {
            // Each quartile's dwell (switch_duration_seconds / 4 = 1s) must
            // elapse before the next shift is applied.
            now += chrono::Duration::seconds(2);
            strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
        }
        assert_eq!(attempt.state, AttemptState::Observing);
        assert_eq!(attempt.current_weight, 100);
    }

    #[tokio::test]
    async fn gradual_shift_blocked_until_dwell_elapses() {
        let gateway = InMemoryGateway::new();
        let metrics = good_source();
        let spec = spec(SwitchStrategy::Gradual);
        let mut attempt = DeploymentAttempt::new(
            "t1",
            "svc-a",
            None,
            1,
            spec.target_hash(),
            StrategyKind::BlueGreen,
            Utc::now(),
        );
        let strategy = BlueGreenStrategy;
        let now = Utc::now();
        strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
        strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
        strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
        assert_eq!(attempt.current_weight, 25);

        let outcome = strategy.step(&spec, &mut attempt, &gateway, &metrics, now).await.unwrap();
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(attempt.current_weight, 25, "next shift must wait for the dwell to elapse");

        let outcome = strategy
            .step(&spec, &mut attempt, &gateway, &metrics, now + chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(attempt.current_weight, 50);
    }
}
