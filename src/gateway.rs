//! Orchestrator Gateway: a uniform interface over the cluster manager
//! (SPEC_FULL §4.1). Grounded in the `Deployer` trait pattern used elsewhere
//! in this ecosystem for abstracting over deployment targets, and in this
//! codebase's own `kube::Api`-based mutation calls (`enforcement.rs`'s
//! `apply_remediation`'s patch calls), generalized
//! behind a trait boundary since the concrete cluster manager is out of
//! scope for this crate (SPEC_FULL §1).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadHandle {
    pub tenant_id: String,
    pub name: String,
    pub version: String,
}

impl WorkloadHandle {
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.tenant_id, self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    pub image: String,
    pub ports: Vec<i32>,
    pub env: BTreeMap<String, String>,
    pub replicas: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadCondition {
    Progressing,
    Available,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub replicas: u32,
    pub ready: u32,
    pub updated: u32,
    pub observed_generation: u64,
    pub generation: u64,
    pub conditions: Vec<WorkloadCondition>,
}

impl WorkloadStatus {
    /// SPEC_FULL §4.4 tie-break: stale status must not be used to evaluate health.
    pub fn is_stale(&self) -> bool {
        self.observed_generation < self.generation
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteBackend {
    pub handle: WorkloadHandle,
    pub weight: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteProgram {
    pub service: String,
    pub backends: Vec<RouteBackend>,
    pub ports: Vec<i32>,
}

impl RouteProgram {
    /// SPEC_FULL §8 invariant: weights across active backends sum to 100
    /// at every observable instant between updates.
    pub fn weights_valid(&self) -> bool {
        let total: u32 = self.backends.iter().map(|b| b.weight as u32).sum();
        total == 100
    }
}

#[derive(Debug, Clone)]
pub enum WorkloadEvent {
    Scaled { replicas: u32 },
    BecameReady,
    Degraded { reason: String },
}

#[async_trait]
pub trait OrchestratorGateway: Send + Sync {
    async fn apply_workload(
        &self,
        tenant_id: &str,
        name: &str,
        version: &str,
        pod_spec: PodSpec,
    ) -> Result<WorkloadHandle, GatewayError>;

    async fn scale_workload(&self, handle: &WorkloadHandle, replicas: u32) -> Result<(), GatewayError>;

    async fn delete_workload(&self, handle: &WorkloadHandle) -> Result<(), GatewayError>;

    async fn get_workload_status(&self, handle: &WorkloadHandle) -> Result<WorkloadStatus, GatewayError>;

    /// Returns the events observed for `handle` since it last quiesced. A
    /// real adapter would expose this as a lazy stream; the in-memory
    /// adapter buffers events and drains them here, which is sufficient for
    /// the reconciler's polling use (SPEC_FULL §5: health evaluation polls,
    /// it does not block on a stream).
    async fn watch_workload_events(&self, handle: &WorkloadHandle) -> Result<Vec<WorkloadEvent>, GatewayError>;

    async fn program_route(&self, route: RouteProgram) -> Result<(), GatewayError>;

    async fn get_route(&self, service: &str) -> Result<Option<RouteProgram>, GatewayError>;
}

/// In-memory adapter used by tests and local runs. Tracks applied workloads
/// and route programs in a mutex-guarded map, exactly as this codebase's
/// `ReconcileState { ready: bool }` wraps shared state in an `Arc<Mutex<_>>`.
#[derive(Default)]
pub struct InMemoryGateway {
    workloads: Mutex<BTreeMap<String, (PodSpec, WorkloadStatus)>>,
    routes: Mutex<BTreeMap<String, RouteProgram>>,
    write_count: Mutex<u64>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> u64 {
        *self.write_count.lock().unwrap()
    }
}

#[async_trait]
impl OrchestratorGateway for InMemoryGateway {
    async fn apply_workload(
        &self,
        tenant_id: &str,
        name: &str,
        version: &str,
        pod_spec: PodSpec,
    ) -> Result<WorkloadHandle, GatewayError> {
        let handle = WorkloadHandle {
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        };
        let mut workloads = self.workloads.lock().unwrap();
        match workloads.get(&handle.key()) {
            Some((existing, _)) if existing == &pod_spec => {
                // Idempotent: identical input, no additional write.
            }
            _ => {
                *self.write_count.lock().unwrap() += 1;
                let status = WorkloadStatus {
                    replicas: pod_spec.replicas,
                    ready: pod_spec.replicas,
                    updated: pod_spec.replicas,
                    observed_generation: 1,
                    generation: 1,
                    conditions: vec![WorkloadCondition::Available],
                };
                workloads.insert(handle.key(), (pod_spec, status));
            }
        }
        Ok(handle)
    }

    async fn scale_workload(&self, handle: &WorkloadHandle, replicas: u32) -> Result<(), GatewayError> {
        let mut workloads = self.workloads.lock().unwrap();
        let (spec, status) = workloads
            .get_mut(&handle.key())
            .ok_or_else(|| GatewayError::NotFound(handle.key()))?;
        spec.replicas = replicas;
        status.replicas = replicas;
        status.ready = replicas;
        status.updated = replicas;
        Ok(())
    }

    async fn delete_workload(&self, handle: &WorkloadHandle) -> Result<(), GatewayError> {
        self.workloads.lock().unwrap().remove(&handle.key());
        Ok(())
    }

    async fn get_workload_status(&self, handle: &WorkloadHandle) -> Result<WorkloadStatus, GatewayError> {
        self.workloads
            .lock()
            .unwrap()
            .get(&handle.key())
            .map(|(_, status)| status.clone())
            .ok_or_else(|| GatewayError::NotFound(handle.key()))
    }

    async fn watch_workload_events(&self, _handle: &WorkloadHandle) -> Result<Vec<WorkloadEvent>, GatewayError> {
        Ok(Vec::new())
    }

    async fn program_route(&self, route: RouteProgram) -> Result<(), GatewayError> {
        if !route.weights_valid() {
            return Err(GatewayError::Permanent(format!(
                "route weights for {} do not sum to 100",
                route.service
            )));
        }
        self.routes.lock().unwrap().insert(route.service.clone(), route);
        Ok(())
    }

    async fn get_route(&self, service: &str) -> Result<Option<RouteProgram>, GatewayError> {
        Ok(self.routes.lock().unwrap().get(service).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_spec() -> PodSpec {
        PodSpec {
            image: "img@sha256:aaa".into(),
            ports: vec![8080],
            env: BTreeMap::new(),
            replicas: 3,
        }
    }

    #[tokio::test]
    async fn apply_workload_is_idempotent() {
        let gateway = InMemoryGateway::new();
        let h1 = gateway
            .apply_workload("t1", "svc-a", "blue", pod_spec())
            .await
            .unwrap();
        let h2 = gateway
            .apply_workload("t1", "svc-a", "blue", pod_spec())
            .await
            .unwrap();
        assert_eq!(h1, h2);
        assert_eq!(gateway.write_count(), 1);
    }

    #[tokio::test]
    async fn apply_workload_with_different_spec_writes_again() {
        let gateway = InMemoryGateway::new();
        gateway
            .apply_workload("t1", "svc-a", "blue", pod_spec())
            .await
            .unwrap();
        let mut changed = pod_spec();
        changed.replicas = 5;
        gateway
            .apply_workload("t1", "svc-a", "blue", changed)
            .await
            .unwrap();
        assert_eq!(gateway.write_count(), 2);
    }

    #[tokio::test]
    async fn program_route_rejects_weights_not_summing_to_100() {
        let gateway = InMemoryGateway::new();
        let handle = gateway
            .apply_workload("t1", "svc-a", "blue", pod_spec())
            .await
            .unwrap();
        let route = RouteProgram {
            service: "svc-a".into(),
            backends: vec![RouteBackend { handle, weight: 50 }],
            ports: vec![8080],
        };
        assert!(gateway.program_route(route).await.is_err());
    }

    #[tokio::test]
    async fn get_status_reflects_scale() {
        let gateway = InMemoryGateway::new();
        let handle = gateway
            .apply_workload("t1", "svc-a", "blue", pod_spec())
            .await
            .unwrap();
        gateway.scale_workload(&handle, 7).await.unwrap();
        let status = gateway.get_workload_status(&handle).await.unwrap();
        assert_eq!(status.replicas, 7);
    }
}
