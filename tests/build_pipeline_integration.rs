//! End-to-end build pipeline coverage: `BuildQueue` fairness and dedup
//! exercised through an actual `BuildExecutor`, asserting on the published
//! event sequence (`build.queued` -> `build.started` -> `build.succeeded`).

mod common;

use chrono::Utc;

use orbitctl::build_executor::BuildExecutor;
use orbitctl::build_queue::BuildQueue;
use orbitctl::config::BuildQueueConfig;
use orbitctl::events::EventBus;
use orbitctl::model::{event_types, BuildStatus};

fn config() -> BuildQueueConfig {
    BuildQueueConfig {
        global_concurrency: 4,
        default_tenant_concurrency: 1,
        lease_ttl: std::time::Duration::from_secs(60),
        max_attempts: 3,
    }
}

#[tokio::test]
async fn build_runs_end_to_end_and_publishes_full_event_sequence() {
    let queue = BuildQueue::new(config());
    let events = EventBus::new();
    let id = queue.enqueue("acme", "https://git/repo", "sha1", "default", &events);

    let build = queue.lease("worker-1", Utc::now()).unwrap();
    assert_eq!(build.id, id);

    let executor = BuildExecutor::new(&queue);
    let completed = executor.execute(build, &events).await;
    assert_eq!(completed.status, BuildStatus::Succeeded);

    let types: Vec<String> = events.all().into_iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            event_types::BUILD_QUEUED.to_string(),
            event_types::BUILD_STARTED.to_string(),
            event_types::BUILD_SUCCEEDED.to_string(),
        ]
    );
}

#[tokio::test]
async fn duplicate_enqueue_across_workers_shares_one_build_and_digest() {
    let queue = BuildQueue::new(config());
    let events = EventBus::new();
    let first_id = queue.enqueue("acme", "https://git/repo", "sha1", "default", &events);
    let second_id = queue.enqueue("acme", "https://git/repo", "sha1", "default", &events);
    assert_eq!(first_id, second_id);

    // Only one build.queued is published, for the original enqueue.
    let queued_count = events
        .all()
        .into_iter()
        .filter(|e| e.event_type == event_types::BUILD_QUEUED)
        .count();
    assert_eq!(queued_count, 1);

    let build = queue.lease("worker-1", Utc::now()).unwrap();
    let executor = BuildExecutor::new(&queue);
    let completed = executor.execute(build, &events).await;
    assert_eq!(completed.status, BuildStatus::Succeeded);
}

#[tokio::test]
async fn fair_round_robin_across_tenants_under_single_worker_capacity() {
    let mut cfg = config();
    cfg.global_concurrency = 1;
    let queue = BuildQueue::new(cfg);
    let events = EventBus::new();

    queue.enqueue("tenant-a", "https://git/repo", "a1", "default", &events);
    queue.enqueue("tenant-a", "https://git/repo", "a2", "default", &events);
    queue.enqueue("tenant-b", "https://git/repo", "b1", "default", &events);

    let executor = BuildExecutor::new(&queue);

    let first = queue.lease("worker-1", Utc::now()).unwrap();
    let first_tenant = first.tenant_id.clone();
    executor.execute(first, &events).await;

    let second = queue.lease("worker-1", Utc::now()).unwrap();
    // Round-robin must not re-serve the same tenant back-to-back while
    // another tenant still has pending work.
    assert_ne!(second.tenant_id, first_tenant);
    executor.execute(second, &events).await;

    let third = queue.lease("worker-1", Utc::now()).unwrap();
    assert_eq!(third.tenant_id, "tenant-a");
}

#[tokio::test]
async fn expired_lease_recovers_and_eventually_fails_after_max_attempts() {
    let mut cfg = config();
    cfg.max_attempts = 2;
    cfg.lease_ttl = std::time::Duration::from_secs(30);
    let queue = BuildQueue::new(cfg);
    let events = EventBus::new();
    let id = queue.enqueue("acme", "https://git/repo", "sha1", "default", &events);

    let now = Utc::now();
    queue.lease("worker-1", now).unwrap();

    let expired = now + chrono::Duration::seconds(60);
    queue.reap_expired_leases(expired);
    assert_eq!(queue.get(&id).unwrap().status, BuildStatus::Pending);

    queue.lease("worker-2", expired).unwrap();
    let much_later = expired + chrono::Duration::seconds(60);
    queue.reap_expired_leases(much_later);

    let build = queue.get(&id).unwrap();
    assert_eq!(build.status, BuildStatus::Failed);
    assert_eq!(build.failure.unwrap().reason, "LeaseExpiredRepeatedly");
}
