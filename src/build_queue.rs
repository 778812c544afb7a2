//! Build Queue: a persistent FIFO queue of build requests, idempotent on
//! content address, leased to workers under a global and per-tenant
//! concurrency cap (SPEC_FULL §4.6). Grounded in this codebase's
//! `acquire_leader` leader-election pattern (a holder-identity + renew-time
//! lease with expiry takeover), generalized from one cluster-wide leader
//! lease to one lease per queued job.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::config::BuildQueueConfig;
use crate::error::BuildQueueError;
use crate::events::EventBus;
use crate::model::event::{event_types, ResourceRef};
use crate::model::{Build, BuildStatus, FailureDetail};

struct QueuedJob {
    build: Build,
    lease_holder: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
}

/// `Enqueue`/`Lease`/`Heartbeat`/`Complete` over an in-memory job table.
/// Ordering across tenants is fair: `lease` walks tenants round-robin from
/// the tenant served last time, matching SPEC_FULL §4.6's "round-robin
/// selection... when multiple tenants have Pending jobs".
pub struct BuildQueue {
    jobs: Mutex<BTreeMap<String, QueuedJob>>,
    insertion_order: Mutex<VecDeque<String>>,
    last_served_tenant: Mutex<Option<String>>,
    config: BuildQueueConfig,
}

impl BuildQueue {
    pub fn new(config: BuildQueueConfig) -> Self {
        Self {
            jobs: Mutex::new(BTreeMap::new()),
            insertion_order: Mutex::new(VecDeque::new()),
            last_served_tenant: Mutex::new(None),
            config,
        }
    }

    /// Idempotent on `(tenant, repo, commit, buildEnv)`: a duplicate enqueue
    /// returns the existing build id instead of creating a second row
    /// (SPEC_FULL §4.6, §8).
    pub fn enqueue(
        &self,
        tenant_id: &str,
        repo_url: &str,
        commit_sha: &str,
        build_env: &str,
        events: &EventBus,
    ) -> String {
        let id = Build::content_address(tenant_id, repo_url, commit_sha, build_env);
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&id) {
            return id;
        }
        let build = Build::new(tenant_id, repo_url, commit_sha, build_env);
        jobs.insert(
            id.clone(),
            QueuedJob {
                build,
                lease_holder: None,
                lease_expires_at: None,
            },
        );
        self.insertion_order.lock().unwrap().push_back(id.clone());
        drop(jobs);
        events.publish(
            event_types::BUILD_QUEUED,
            tenant_id,
            ResourceRef {
                kind: "build".into(),
                id: id.clone(),
            },
            serde_json::json!({ "repoUrl": repo_url, "commitSha": commit_sha, "buildEnv": build_env }),
        );
        id
    }

    /// Atomically selects the oldest Pending job that does not exceed the
    /// global or per-tenant concurrency cap, marks it Running with a lease
    /// expiring at `now + ttl`, and returns it.
    pub fn lease(&self, worker_id: &str, now: DateTime<Utc>) -> Option<Build> {
        self.reap_expired_leases(now);

        let mut jobs = self.jobs.lock().unwrap();
        let running_total = jobs
            .values()
            .filter(|j| j.build.status == BuildStatus::Running)
            .count();
        if running_total >= self.config.global_concurrency {
            return None;
        }

        let order = self.insertion_order.lock().unwrap();
        let tenants_in_order: Vec<String> = {
            let mut seen = Vec::new();
            for id in order.iter() {
                if let Some(job) = jobs.get(id) {
                    if job.build.status == BuildStatus::Pending && !seen.contains(&job.build.tenant_id) {
                        seen.push(job.build.tenant_id.clone());
                    }
                }
            }
            seen
        };
        if tenants_in_order.is_empty() {
            return None;
        }

        let last = self.last_served_tenant.lock().unwrap().clone();
        let start = last
            .as_ref()
            .and_then(|t| tenants_in_order.iter().position(|x| x == t))
            .map(|i| (i + 1) % tenants_in_order.len())
            .unwrap_or(0);

        for offset in 0..tenants_in_order.len() {
            let tenant = &tenants_in_order[(start + offset) % tenants_in_order.len()];
            let tenant_running = jobs
                .values()
                .filter(|j| j.build.tenant_id == *tenant && j.build.status == BuildStatus::Running)
                .count();
            if tenant_running >= self.config.default_tenant_concurrency {
                continue;
            }
            let next_id = order.iter().find(|id| {
                jobs.get(*id)
                    .is_some_and(|j| j.build.tenant_id == *tenant && j.build.status == BuildStatus::Pending)
            });
            if let Some(id) = next_id.cloned() {
                let job = jobs.get_mut(&id).expect("id came from jobs map");
                job.build.status = BuildStatus::Running;
                job.build.started_at = Some(now);
                job.lease_holder = Some(worker_id.to_string());
                job.lease_expires_at = Some(now + chrono::Duration::seconds(self.config.lease_ttl.as_secs() as i64));
                *self.last_served_tenant.lock().unwrap() = Some(tenant.clone());
                return Some(job.build.clone());
            }
        }
        None
    }

    /// Extends the lease; fails if the lease has expired or is held by a
    /// different worker.
    pub fn heartbeat(&self, build_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<(), BuildQueueError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(build_id)
            .ok_or_else(|| BuildQueueError::NotFound(build_id.to_string()))?;
        match (&job.lease_holder, job.lease_expires_at) {
            (Some(holder), Some(expires)) if holder == worker_id && expires > now => {
                job.lease_expires_at = Some(now + chrono::Duration::seconds(self.config.lease_ttl.as_secs() as i64));
                Ok(())
            }
            (Some(holder), _) if holder != worker_id => Err(BuildQueueError::LeaseConflict),
            _ => Err(BuildQueueError::LeaseExpired),
        }
    }

    /// Transitions a leased build to a terminal state.
    pub fn complete(&self, build_id: &str, result: BuildResult) -> Result<Build, BuildQueueError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(build_id)
            .ok_or_else(|| BuildQueueError::NotFound(build_id.to_string()))?;
        job.build.completed_at = Some(Utc::now());
        job.lease_holder = None;
        job.lease_expires_at = None;
        match result {
            BuildResult::Succeeded { image_digest } => {
                job.build.status = BuildStatus::Succeeded;
                job.build.image_digest = Some(image_digest);
            }
            BuildResult::Failed { reason } => {
                job.build.status = BuildStatus::Failed;
                job.build.failure = Some(reason);
            }
        }
        Ok(job.build.clone())
    }

    /// Expired leases return their job to Pending with `attempts += 1`;
    /// after `maxAttempts` the job fails with `LeaseExpiredRepeatedly`
    /// (SPEC_FULL §4.6).
    pub fn reap_expired_leases(&self, now: DateTime<Utc>) {
        let mut jobs = self.jobs.lock().unwrap();
        for job in jobs.values_mut() {
            if job.build.status != BuildStatus::Running {
                continue;
            }
            if let Some(expires) = job.lease_expires_at {
                if expires <= now {
                    job.lease_holder = None;
                    job.lease_expires_at = None;
                    job.build.attempts += 1;
                    if job.build.attempts >= self.config.max_attempts {
                        job.build.status = BuildStatus::Failed;
                        job.build.completed_at = Some(now);
                        job.build.failure = Some(FailureDetail {
                            reason: "LeaseExpiredRepeatedly".to_string(),
                            message: format!(
                                "lease expired {} times, exceeding maxAttempts {}",
                                job.build.attempts, self.config.max_attempts
                            ),
                        });
                    } else {
                        job.build.status = BuildStatus::Pending;
                        job.build.started_at = None;
                    }
                }
            }
        }
    }

    pub fn get(&self, build_id: &str) -> Option<Build> {
        self.jobs.lock().unwrap().get(build_id).map(|j| j.build.clone())
    }
}

#[derive(Debug, Clone)]
pub enum BuildResult {
    Succeeded { image_digest: String },
    Failed { reason: FailureDetail },
}
