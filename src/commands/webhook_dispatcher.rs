//! `orbitctl webhook-dispatcher`: the Event Bus + Webhook Dispatcher
//! process role (SPEC_FULL §2.1, §4.9). Subscriptions are read once at
//! startup from a YAML manifest (`ORBITCTL_SUBSCRIPTIONS_FILE`), for the
//! same reason `reconciler.rs` reads a services manifest. The ambient
//! axum/Prometheus process shape is grounded in this codebase's original
//! admission-webhook server (see DESIGN.md), even though that one served
//! *inbound* requests and this one drains *outbound* deliveries.

use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};

use anyhow::Context;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use tokio::signal;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use orbitctl::config::WebhookConfig;
use orbitctl::events::EventBus;
use orbitctl::model::WebhookSubscription;
use orbitctl::webhook_dispatcher::{ReqwestSender, WebhookDispatcher};

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RETRY_SWEEPS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("orbitctl_webhook_retry_sweeps_total", "Total retry-due-deliveries sweeps run")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

struct DispatcherState {
    ready: bool,
}

fn load_subscriptions() -> anyhow::Result<Vec<WebhookSubscription>> {
    let path = std::env::var("ORBITCTL_SUBSCRIPTIONS_FILE").unwrap_or_else(|_| "subscriptions.yaml".into());
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let subs: Vec<WebhookSubscription> =
                serde_yaml::from_str(&contents).with_context(|| format!("parsing {path}"))?;
            Ok(subs)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path, "subscriptions_file_not_found_starting_with_none");
            Ok(Vec::new())
        }
        Err(e) => Err(e).with_context(|| format!("reading {path}")),
    }
}

pub async fn run() -> anyhow::Result<()> {
    println!("Starting orbitctl webhook-dispatcher...\n");

    let config = WebhookConfig::default();
    let subscriptions = load_subscriptions()?;

    println!("  Subscriptions ................. {}", subscriptions.len());
    println!("  Delivery timeout .............. {}s", config.delivery_timeout.as_secs());
    println!("  Metrics server ................ http://{}", config.metrics_addr);
    println!();
    println!("Webhook dispatcher running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    info!("webhook_dispatcher_started");

    LazyLock::force(&RETRY_SWEEPS);

    let sender = ReqwestSender::new(&config);
    let dispatcher = WebhookDispatcher::new(sender);
    for subscription in subscriptions {
        dispatcher.add_subscription(subscription);
    }
    let events = EventBus::new();

    let state = Arc::new(Mutex::new(DispatcherState { ready: true }));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_state = state.clone();
    let http_shutdown = shutdown_tx.subscribe();
    let addr = config.metrics_addr;
    let http_handle = tokio::spawn(async move { start_metrics_server(http_state, http_shutdown, addr).await });

    let mut retry_shutdown = shutdown_tx.subscribe();
    let retry_loop = async {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            interval.tick().await;
            dispatcher.retry_due_deliveries(&events).await;
            RETRY_SWEEPS.inc();
        }
    };

    tokio::select! {
        _ = retry_loop => {}
        _ = retry_shutdown.recv() => {}
        _ = signal::ctrl_c() => {
            info!("shutdown_signal_received");
            println!("\n{}", "=".repeat(70));
            println!("Shutdown signal received. Stopping webhook dispatcher...");
            println!("{}", "=".repeat(70));
        }
    }

    let _ = shutdown_tx.send(());
    let _ = http_handle.await?;

    info!("webhook_dispatcher_stopped");
    println!("Webhook dispatcher stopped.");

    Ok(())
}

fn build_router(state: Arc<Mutex<DispatcherState>>) -> Router {
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
    state: Arc<Mutex<DispatcherState>>,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind webhook dispatcher metrics server on {addr}"))?;

    info!(addr = %addr, "webhook_dispatcher_metrics_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

async fn ready_handler(state: Arc<Mutex<DispatcherState>>) -> impl IntoResponse {
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

    fn state(ready: bool) -> Arc<Mutex<DispatcherState>> {
        Arc::new(Mutex::new(DispatcherState { ready }))
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = build_router(state(true));
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
