//! Service Reconciler (CORE): drives a declared `ServiceSpec` toward
//! observed cluster state, one tick at a time, across the rolling/canary/
//! blue-green state machine in `strategies` (SPEC_FULL §4.4). The
//! lease-per-service model is grounded in this codebase's `acquire_leader`
//! pattern (holder identity + renew time + expiry takeover), generalized
//! from one cluster-wide leader lease to one lease per
//! `(tenantId, serviceName)`; the process shape (metrics, tracing,
//! graceful shutdown) is grounded in the `commands/reconciler` binary role.

pub mod strategies;

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::ReconcilerConfig;
use crate::error::GatewayError;
use crate::events::EventBus;
use crate::gateway::{OrchestratorGateway, RouteProgram, WorkloadHandle};
use crate::health::MetricsSource;
use crate::model::{
    event_types, AttemptState, DeploymentAttempt, FailureReason, ResourceRef, RevisionHistory,
    ServiceRevision, ServiceSpec, StrategyKind,
};

use strategies::{select_strategy, StepOutcome, StrategyError};

fn service_key(tenant_id: &str, name: &str) -> String {
    format!("{tenant_id}/{name}")
}

struct ServiceLease {
    holder: String,
    renewed_at: DateTime<Utc>,
}

/// One lease per service key, renewed on every tick the current holder
/// serves and reclaimable once the ttl has elapsed since the last renewal
/// (SPEC_FULL §5: "lease is renewed via heartbeat and expires on process
/// loss").
struct LeaseTable {
    leases: Mutex<BTreeMap<String, ServiceLease>>,
    ttl: chrono::Duration,
}

impl LeaseTable {
    fn new(ttl: std::time::Duration) -> Self {
        Self {
            leases: Mutex::new(BTreeMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30)),
        }
    }

    fn try_acquire_or_renew(&self, key: &str, holder: &str, now: DateTime<Utc>) -> bool {
        let mut leases = self.leases.lock().unwrap();
        let acquirable = match leases.get(key) {
            Some(existing) => existing.holder == holder || now - existing.renewed_at >= self.ttl,
            None => true,
        };
        if acquirable {
            leases.insert(
                key.to_string(),
                ServiceLease {
                    holder: holder.to_string(),
                    renewed_at: now,
                },
            );
        }
        acquirable
    }
}

#[derive(Default)]
struct ServiceStore {
    specs: Mutex<BTreeMap<String, ServiceSpec>>,
    attempts: Mutex<BTreeMap<String, DeploymentAttempt>>,
    revisions: Mutex<BTreeMap<String, RevisionHistory>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Another holder's lease is still live; this tick did no work.
    NotLeaseHolder,
    /// No non-terminal attempt and the spec already matches the last
    /// committed revision: nothing to do.
    Idle,
    Started,
    Progressing,
    Committed,
    RolledBack,
    Failed(FailureReason),
}

/// The core control loop object: one instance is constructed per process
/// with its dependencies (gateway, event bus, config) per SPEC_FULL §9's
/// "no ambient singletons" rule, and shared across every service it drives.
pub struct ServiceReconciler<'a> {
    gateway: &'a dyn OrchestratorGateway,
    events: &'a EventBus,
    config: ReconcilerConfig,
    store: ServiceStore,
    leases: LeaseTable,
}

impl<'a> ServiceReconciler<'a> {
    pub fn new(gateway: &'a dyn OrchestratorGateway, events: &'a EventBus, config: ReconcilerConfig) -> Self {
        let leases = LeaseTable::new(config.lease_duration);
        Self {
            gateway,
            events,
            config,
            store: ServiceStore::default(),
            leases,
        }
    }

    /// Registers or replaces the declared spec for a service. Declaring a
    /// new spec never mutates an in-flight attempt directly; the next tick
    /// observes the hash change and reacts (SPEC_FULL §4.4 diff step).
    pub fn declare(&self, spec: ServiceSpec) {
        let key = service_key(&spec.tenant_id, &spec.name);
        self.store.specs.lock().unwrap().insert(key, spec);
    }

    pub fn attempt_for(&self, tenant_id: &str, name: &str) -> Option<DeploymentAttempt> {
        self.store
            .attempts
            .lock()
            .unwrap()
            .get(&service_key(tenant_id, name))
            .cloned()
    }

    pub fn revisions_for(&self, tenant_id: &str, name: &str) -> Option<RevisionHistory> {
        self.store
            .revisions
            .lock()
            .unwrap()
            .get(&service_key(tenant_id, name))
            .cloned()
    }

    fn timeout_for(&self, strategy: StrategyKind) -> std::time::Duration {
        match strategy {
            StrategyKind::Rolling => self.config.rolling_timeout,
            StrategyKind::Canary => self.config.canary_timeout,
            StrategyKind::BlueGreen => self.config.blue_green_timeout,
        }
    }

    /// Runs one reconciler tick for `(tenant_id, name)`: acquires/renews the
    /// service's lease, diffs the declared spec against the in-flight
    /// attempt, and executes one strategy step (SPEC_FULL §4.4 "Each tick").
    pub async fn tick(
        &self,
        tenant_id: &str,
        name: &str,
        holder: &str,
        metrics: &dyn MetricsSource,
    ) -> Result<TickOutcome, ReconcileTickError> {
        let now = Utc::now();
        let key = service_key(tenant_id, name);

        if !self.leases.try_acquire_or_renew(&key, holder, now) {
            return Ok(TickOutcome::NotLeaseHolder);
        }

        let spec = self
            .store
            .specs
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| ReconcileTickError::UnknownService(key.clone()))?;
        spec.validate().map_err(ReconcileTickError::InvalidSpec)?;

        let target_hash = spec.target_hash();
        let mut attempt = self.store.attempts.lock().unwrap().get(&key).cloned();

        if let Some(existing) = &attempt {
            if existing.target_hash != target_hash {
                if !existing.state.is_terminal() {
                    // SPEC_FULL §5: a new spec hash cancels any in-flight
                    // attempt at the next tick via best-effort cleanup.
                    self.best_effort_cleanup(&spec, existing).await;
                    info!(service = %key, "attempt_cancelled_for_new_spec");
                }
                attempt = None;
            }
        }

        let mut attempt = match attempt {
            Some(a) => a,
            None => {
                let history = self.store.revisions.lock().unwrap().get(&key).cloned().unwrap_or_default();
                let from_revision = history.latest().map(|r| r.revision);
                let to_revision = history.next_revision_number();
                let new_attempt = DeploymentAttempt::new(
                    tenant_id,
                    name,
                    from_revision,
                    to_revision,
                    target_hash.clone(),
                    spec.strategy.kind,
                    now,
                );
                self.events.publish(
                    event_types::DEPLOYMENT_STARTED,
                    tenant_id,
                    ResourceRef { kind: "service".into(), id: name.to_string() },
                    serde_json::json!({ "strategy": spec.strategy.kind, "toRevision": to_revision }),
                );
                self.store.attempts.lock().unwrap().insert(key.clone(), new_attempt.clone());
                return Ok(self.persist_and_return(&key, new_attempt, TickOutcome::Started));
            }
        };

        if attempt.state.is_terminal() {
            return Ok(TickOutcome::Idle);
        }

        let timeout = self.timeout_for(attempt.strategy);
        if now.signed_duration_since(attempt.started_at) > chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(i64::MAX)) {
            self.best_effort_cleanup(&spec, &attempt).await;
            let _ = attempt.fail(FailureReason::Timeout, now);
            self.events.publish(
                event_types::DEPLOYMENT_FAILED,
                tenant_id,
                ResourceRef { kind: "service".into(), id: name.to_string() },
                serde_json::json!({ "reason": "Timeout" }),
            );
            return Ok(self.persist_and_return(&key, attempt, TickOutcome::Failed(FailureReason::Timeout)));
        }

        let strategy = select_strategy(spec.strategy.kind);
        let outcome = self.step_with_retry(&*strategy, &spec, &mut attempt, metrics, now).await;

        let tick_outcome = match outcome {
            Ok(StepOutcome::Continue) => {
                self.events.publish(
                    event_types::DEPLOYMENT_PROGRESSING,
                    tenant_id,
                    ResourceRef { kind: "service".into(), id: name.to_string() },
                    serde_json::json!({ "state": attempt.state, "currentWeight": attempt.current_weight }),
                );
                TickOutcome::Progressing
            }
            Ok(StepOutcome::Committed) => {
                self.promote_revision(&key, &attempt);
                self.events.publish(
                    event_types::DEPLOYMENT_SUCCEEDED,
                    tenant_id,
                    ResourceRef { kind: "service".into(), id: name.to_string() },
                    serde_json::json!({ "revision": attempt.to_revision }),
                );
                TickOutcome::Committed
            }
            Ok(StepOutcome::RolledBack) => {
                self.events.publish(
                    event_types::DEPLOYMENT_ROLLED_BACK,
                    tenant_id,
                    ResourceRef { kind: "service".into(), id: name.to_string() },
                    serde_json::json!({ "reason": attempt.rollback_reason }),
                );
                TickOutcome::RolledBack
            }
            Err(reason) => {
                warn!(service = %key, ?reason, "reconcile_step_failed");
                let _ = attempt.fail(reason, now);
                self.events.publish(
                    event_types::DEPLOYMENT_FAILED,
                    tenant_id,
                    ResourceRef { kind: "service".into(), id: name.to_string() },
                    serde_json::json!({ "reason": reason }),
                );
                TickOutcome::Failed(reason)
            }
        };

        Ok(self.persist_and_return(&key, attempt, tick_outcome))
    }

    fn persist_and_return(&self, key: &str, attempt: DeploymentAttempt, outcome: TickOutcome) -> TickOutcome {
        self.store.attempts.lock().unwrap().insert(key.to_string(), attempt);
        outcome
    }

    fn promote_revision(&self, key: &str, attempt: &DeploymentAttempt) {
        let mut revisions = self.store.revisions.lock().unwrap();
        let history = revisions.entry(key.to_string()).or_default();
        history.push(ServiceRevision {
            tenant_id: attempt.tenant_id.clone(),
            service_name: attempt.service_name.clone(),
            revision: attempt.to_revision,
            image_digest: attempt.target_hash.clone(),
            created_at: Utc::now(),
            origin_build_id: format!("build-{}", attempt.to_revision),
        });
    }

    /// SPEC_FULL §4.4 tie-break: retry a Transient gateway error with
    /// exponential backoff (base 1s, factor 2, cap 60s, at most 6
    /// attempts) before giving up and marking the attempt Failed.
    async fn step_with_retry(
        &self,
        strategy: &dyn strategies::RolloutStrategy,
        spec: &ServiceSpec,
        attempt: &mut DeploymentAttempt,
        metrics: &dyn MetricsSource,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, FailureReason> {
        let mut delay_secs = 1u64;
        for attempt_no in 0..6u32 {
            match strategy.step(spec, attempt, self.gateway, metrics, now).await {
                Ok(outcome) => return Ok(outcome),
                Err(StrategyError::Gateway(GatewayError::Transient(reason))) => {
                    warn!(attempt_no, reason = %reason, "transient_gateway_error_retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
                    delay_secs = (delay_secs * 2).min(60);
                    continue;
                }
                Err(StrategyError::Gateway(GatewayError::Conflict(_))) => {
                    // Re-read and retry once with no backoff, as the route/
                    // status may now be authoritative.
                    continue;
                }
                Err(StrategyError::Gateway(GatewayError::Permanent(_)))
                | Err(StrategyError::Gateway(GatewayError::NotFound(_))) => {
                    return Err(FailureReason::OrchestratorPermanent);
                }
                Err(StrategyError::HealthGateFailed(_)) => {
                    return Err(FailureReason::InternalInconsistency);
                }
                Err(StrategyError::MissingParams(_)) => {
                    return Err(FailureReason::InternalInconsistency);
                }
            }
        }
        Err(FailureReason::OrchestratorPermanent)
    }

    /// Best-effort cleanup of a cancelled or timed-out attempt: delete any
    /// canary/green workload and restore the route to the stable/blue
    /// backend. Failures here are logged, never propagated (SPEC_FULL §5:
    /// "cooperative: the in-flight attempt runs a best-effort cleanup").
    async fn best_effort_cleanup(&self, spec: &ServiceSpec, attempt: &DeploymentAttempt) {
        let candidate_versions = match attempt.strategy {
            StrategyKind::Canary => vec!["canary"],
            StrategyKind::BlueGreen => vec!["green"],
            StrategyKind::Rolling => vec![],
        };
        let stable_version = match attempt.strategy {
            StrategyKind::Canary => "stable",
            StrategyKind::BlueGreen => "blue",
            StrategyKind::Rolling => "current",
        };

        for version in candidate_versions {
            let handle = WorkloadHandle {
                tenant_id: attempt.tenant_id.clone(),
                name: attempt.service_name.clone(),
                version: version.to_string(),
            };
            if let Err(err) = self.gateway.delete_workload(&handle).await {
                warn!(service = %attempt.service_name, version, error = %err, "cleanup_delete_failed");
            }
        }

        if attempt.current_weight > 0 {
            let route = RouteProgram {
                service: spec.name.clone(),
                backends: vec![crate::gateway::RouteBackend {
                    handle: WorkloadHandle {
                        tenant_id: attempt.tenant_id.clone(),
                        name: attempt.service_name.clone(),
                        version: stable_version.to_string(),
                    },
                    weight: 100,
                }],
                ports: spec.ports.clone(),
            };
            if let Err(err) = self.gateway.program_route(route).await {
                warn!(service = %attempt.service_name, error = %err, "cleanup_route_restore_failed");
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileTickError {
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("invalid service spec: {0}")]
    InvalidSpec(String),
}
