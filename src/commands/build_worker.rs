//! `orbitctl build-worker`: the Build Executor process role (SPEC_FULL
//! §2.1, §4.6, §4.7). Same process shape as `reconciler.rs`: Prometheus
//! registry, axum health/metrics router, `tokio::select!` graceful
//! shutdown. Build requests to seed the
//! queue at startup are read from a YAML manifest
//! (`ORBITCTL_BUILDS_FILE`) for the same reason `reconciler.rs` reads a
//! services manifest: this in-memory build has no shared queue to poll.

use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};

use anyhow::Context;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use serde::Deserialize;
use tokio::signal;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use orbitctl::build_executor::BuildExecutor;
use orbitctl::build_queue::BuildQueue;
use orbitctl::config::BuildQueueConfig;
use orbitctl::events::EventBus;
use orbitctl::model::BuildStatus;

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static BUILDS_LEASED: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("orbitctl_build_worker_leased_total", "Total builds leased by this worker")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

static BUILDS_SUCCEEDED: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("orbitctl_build_worker_succeeded_total", "Total builds completed successfully")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

#[derive(Debug, Deserialize)]
struct BuildRequest {
    tenant_id: String,
    repo_url: String,
    commit_sha: String,
    #[serde(default = "default_build_env")]
    build_env: String,
}

fn default_build_env() -> String {
    "default".to_string()
}

struct WorkerState {
    ready: bool,
}

fn load_build_requests() -> anyhow::Result<Vec<BuildRequest>> {
    let path = std::env::var("ORBITCTL_BUILDS_FILE").unwrap_or_else(|_| "builds.yaml".into());
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let requests: Vec<BuildRequest> =
                serde_yaml::from_str(&contents).with_context(|| format!("parsing {path}"))?;
            Ok(requests)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path, "builds_file_not_found_starting_with_empty_queue");
            Ok(Vec::new())
        }
        Err(e) => Err(e).with_context(|| format!("reading {path}")),
    }
}

pub async fn run() -> anyhow::Result<()> {
    println!("Starting orbitctl build-worker...\n");

    let worker_id = format!("build-worker-{}", std::process::id());
    let config = BuildQueueConfig::default();
    let metrics_addr: SocketAddr = std::env::var("ORBITCTL_BUILD_WORKER_METRICS_ADDR")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| ([0, 0, 0, 0], 9092).into());

    let queue = BuildQueue::new(config.clone());
    let events = EventBus::new();
    let requests = load_build_requests()?;
    for request in &requests {
        queue.enqueue(&request.tenant_id, &request.repo_url, &request.commit_sha, &request.build_env, &events);
    }

    println!("  Worker id ..................... {worker_id}");
    println!("  Seeded build requests ......... {}", requests.len());
    println!("  Global concurrency ............ {}", config.global_concurrency);
    println!("  Lease TTL ...................... {}s", config.lease_ttl.as_secs());
    println!("  Metrics server ................ http://{metrics_addr}");
    println!();
    println!("Build worker running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    info!(worker_id = %worker_id, "build_worker_started");

    LazyLock::force(&BUILDS_LEASED);
    LazyLock::force(&BUILDS_SUCCEEDED);

    let executor = BuildExecutor::new(&queue);

    let state = Arc::new(Mutex::new(WorkerState { ready: true }));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_state = state.clone();
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move { start_metrics_server(http_state, http_shutdown, metrics_addr).await });

    let mut poll_shutdown = shutdown_tx.subscribe();
    let poll_loop = async {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(500));
        loop {
            interval.tick().await;
            queue.reap_expired_leases(Utc::now());
            while let Some(build) = queue.lease(&worker_id, Utc::now()) {
                BUILDS_LEASED.inc();
                let completed = executor.execute(build, &events).await;
                if completed.status == BuildStatus::Succeeded {
                    BUILDS_SUCCEEDED.inc();
                }
                println!(
                    "[{}] build {}: {:?}",
                    chrono::Utc::now().format("%H:%M:%S"),
                    completed.id,
                    completed.status
                );
            }
        }
    };

    tokio::select! {
        _ = poll_loop => {}
        _ = poll_shutdown.recv() => {}
        _ = signal::ctrl_c() => {
            info!("shutdown_signal_received");
            println!("\n{}", "=".repeat(70));
            println!("Shutdown signal received. Stopping build worker...");
            println!("{}", "=".repeat(70));
        }
    }

    let _ = shutdown_tx.send(());
    let _ = http_handle.await?;

    info!("build_worker_stopped");
    println!("Build worker stopped.");

    Ok(())
}

fn build_router(state: Arc<Mutex<WorkerState>>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route(
            "/readyz",
            get({
                let state = state.clone();
                move || ready_handler(state.clone())
            }),
        )
}

async fn start_metrics_server(
    state: Arc<Mutex<WorkerState>>,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind build worker metrics server on {addr}"))?;

    info!(addr = %addr, "build_worker_metrics_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

async fn ready_handler(state: Arc<Mutex<WorkerState>>) -> impl IntoResponse {
    let state = state.lock().await;
    if state.ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
        },
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(ready: bool) -> Arc<Mutex<WorkerState>> {
        Arc::new(Mutex::new(WorkerState { ready }))
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = build_router(state(false));
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_when_ready() {
        let app = build_router(state(true));
        let req = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
