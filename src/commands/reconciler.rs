//! `orbitctl reconciler`: the Service Reconciler process role (SPEC_FULL
//! §2.1, §4.4). Process shape — Prometheus registry behind a `LazyLock`,
//! an axum `/healthz`/`/readyz`/`/metrics` router, `tokio::select!` against
//! `ctrl_c()` and a `broadcast` shutdown channel — is lifted directly from
//! this codebase's original reconcile-loop process entrypoint (see
//! DESIGN.md). Declared `ServiceSpec`s are read once at
//! startup from a YAML manifest (`ORBITCTL_SERVICES_FILE`); a real
//! deployment would source these from the `services` table SPEC_FULL §6
//! describes, which this in-memory build doesn't persist.

use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Context;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};
use tokio::signal;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use orbitctl::config::ReconcilerConfig;
use orbitctl::events::EventBus;
use orbitctl::gateway::InMemoryGateway;
use orbitctl::health::FixedMetricsSource;
use orbitctl::model::ServiceSpec;
use orbitctl::reconciler::{ServiceReconciler, TickOutcome};

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static TICK_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("orbitctl_reconciler_ticks_total", "Total reconciler ticks run")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

static OUTCOME_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("orbitctl_reconciler_tick_outcomes_total", "Tick outcomes by kind"),
        &["outcome"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

struct ReconcilerState {
    ready: bool,
}

fn outcome_label(outcome: &TickOutcome) -> &'static str {
    match outcome {
        TickOutcome::NotLeaseHolder => "not_lease_holder",
        TickOutcome::Idle => "idle",
        TickOutcome::Started => "started",
        TickOutcome::Progressing => "progressing",
        TickOutcome::Committed => "committed",
        TickOutcome::RolledBack => "rolled_back",
        TickOutcome::Failed(_) => "failed",
    }
}

fn load_services() -> anyhow::Result<Vec<ServiceSpec>> {
    let path = std::env::var("ORBITCTL_SERVICES_FILE").unwrap_or_else(|_| "services.yaml".into());
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let specs: Vec<ServiceSpec> =
                serde_yaml::from_str(&contents).with_context(|| format!("parsing {path}"))?;
            Ok(specs)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path, "services_file_not_found_starting_with_no_declared_services");
            Ok(Vec::new())
        }
        Err(e) => Err(e).with_context(|| format!("reading {path}")),
    }
}

pub async fn run() -> anyhow::Result<()> {
    println!("Starting orbitctl reconciler...\n");

    let config = ReconcilerConfig::default();
    let services = load_services()?;

    println!("  Declared services ............ {}", services.len());
    println!("  Tick interval ................. {}ms", config.tick_interval.as_millis());
    println!("  Lease duration ................ {}s", config.lease_duration.as_secs());
    println!("  Metrics server ................ http://{}", config.metrics_addr);
    println!();
    println!("  Available endpoints:");
    println!("    GET /healthz .............. Liveness probe (always 200 OK)");
    println!("    GET /readyz ............... Readiness probe (503 until first tick, then 200)");
    println!("    GET /metrics .............. Prometheus metrics scrape endpoint");
    println!();
    println!("Reconciler running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    info!("reconciler_started");

    LazyLock::force(&TICK_TOTAL);
    LazyLock::force(&OUTCOME_TOTAL);

    let gateway = InMemoryGateway::new();
    let events = EventBus::new();
    let reconciler = ServiceReconciler::new(&gateway, &events, config.clone());
    let keys: Vec<(String, String)> = services
        .into_iter()
        .map(|spec| {
            let key = (spec.tenant_id.clone(), spec.name.clone());
            reconciler.declare(spec);
            key
        })
        .collect();
    let metrics_source = FixedMetricsSource { bucket_seconds: 60, samples: Vec::new() };

    let state = Arc::new(Mutex::new(ReconcilerState { ready: keys.is_empty() }));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_state = state.clone();
    let http_shutdown = shutdown_tx.subscribe();
    let addr = config.metrics_addr;
    let http_handle = tokio::spawn(async move { start_metrics_server(http_state, http_shutdown, addr).await });

    let mut tick_shutdown = shutdown_tx.subscribe();
    let tick_loop = async {
        let mut interval = tokio::time::interval(config.tick_interval);
        loop {
            interval.tick().await;
            for (tenant_id, name) in &keys {
                TICK_TOTAL.inc();
                match reconciler.tick(tenant_id, name, "reconciler-1", &metrics_source).await {
                    Ok(outcome) => {
                        OUTCOME_TOTAL.with_label_values(&[outcome_label(&outcome)]).inc();
                        println!(
                            "[{}] {tenant_id}/{name}: {:?}",
                            chrono::Utc::now().format("%H:%M:%S"),
                            outcome
                        );
                    }
                    Err(err) => {
                        warn!(tenant_id = %tenant_id, service = %name, error = %err, "reconcile_tick_error");
                    }
                }
            }
            let mut s = state.lock().await;
            if !s.ready {
                s.ready = true;
            }
        }
    };

    tokio::select! {
        _ = tick_loop => {}
        _ = tick_shutdown.recv() => {}
        _ = signal::ctrl_c() => {
            info!("shutdown_signal_received");
            println!("\n{}", "=".repeat(70));
            println!("Shutdown signal received. Stopping reconciler...");
            println!("{}", "=".repeat(70));
        }
    }

    let _ = shutdown_tx.send(());
    let _ = http_handle.await?;

    info!("reconciler_stopped");
    println!("Reconciler stopped.");

    Ok(())
}

fn build_router(state: Arc<Mutex<ReconcilerState>>) -> Router {
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
    state: Arc<Mutex<ReconcilerState>>,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind reconciler metrics server on {addr}"))?;

    info!(addr = %addr, "reconciler_metrics_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

async fn ready_handler(state: Arc<Mutex<ReconcilerState>>) -> impl IntoResponse {
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
