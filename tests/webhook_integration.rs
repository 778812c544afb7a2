//! End-to-end webhook coverage driven through `EventBus::subscribe()`
//! rather than direct `dispatch()` calls, to exercise the same fan-out path
//! the `webhook-dispatcher` process role runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use orbitctl::error::WebhookError;
use orbitctl::events::EventBus;
use orbitctl::model::{event_types, DeliveryState, ResourceRef, WebhookSubscription};
use orbitctl::webhook_dispatcher::{HttpSender, WebhookDispatcher};

struct AlwaysSucceeds {
    calls: AtomicUsize,
}

#[async_trait]
impl HttpSender for AlwaysSucceeds {
    async fn post(&self, _url: &str, _body: Vec<u8>, _sig: String) -> Result<u16, WebhookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(200)
    }
}

struct AlwaysFails;

#[async_trait]
impl HttpSender for AlwaysFails {
    async fn post(&self, _url: &str, _body: Vec<u8>, _sig: String) -> Result<u16, WebhookError> {
        Ok(503)
    }
}

fn subscription(id: &str, globs: Vec<&str>) -> WebhookSubscription {
    WebhookSubscription {
        id: id.into(),
        tenant_id: "acme".into(),
        url: "https://hooks.acme.test/deploy".into(),
        secret: "s3cr3t".into(),
        event_type_globs: globs.into_iter().map(String::from).collect(),
        enabled: true,
    }
}

#[tokio::test]
async fn events_published_on_the_bus_are_forwarded_and_delivered() {
    let bus = EventBus::new();
    let dispatcher = Arc::new(WebhookDispatcher::new(AlwaysSucceeds { calls: AtomicUsize::new(0) }));
    dispatcher.add_subscription(subscription("sub-1", vec!["deployment.*"]));

    let mut receiver = bus.subscribe();
    let forwarder_dispatcher = dispatcher.clone();
    let forwarder_bus = EventBus::new();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            forwarder_dispatcher.dispatch(&event, &forwarder_bus).await;
        }
    });

    let event = bus.publish(
        event_types::DEPLOYMENT_SUCCEEDED,
        "acme",
        ResourceRef { kind: "service".into(), id: "web".into() },
        serde_json::json!({ "revision": 3 }),
    );
    // A non-matching event must reach the subscriber loop without creating a delivery.
    let unrelated = bus.publish(
        event_types::BUILD_SUCCEEDED,
        "acme",
        ResourceRef { kind: "build".into(), id: "b1".into() },
        serde_json::json!({}),
    );

    // Give the forwarder task a chance to drain both events.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    drop(bus);
    forwarder.await.unwrap();

    assert_eq!(dispatcher.delivery_state("sub-1", &event.id.to_string()), Some(DeliveryState::Delivered));
    assert_eq!(dispatcher.delivery_state("sub-1", &unrelated.id.to_string()), None);
}

#[tokio::test]
async fn failing_endpoint_enters_retry_and_eventually_dead_letters() {
    let dispatcher = WebhookDispatcher::new(AlwaysFails);
    dispatcher.add_subscription(subscription("sub-1", vec!["*"]));
    let events = EventBus::new();

    let event = events.publish(
        event_types::DEPLOYMENT_FAILED,
        "acme",
        ResourceRef { kind: "service".into(), id: "web".into() },
        serde_json::json!({}),
    );
    dispatcher.dispatch(&event, &events).await;
    assert_eq!(
        dispatcher.delivery_state("sub-1", &event.id.to_string()),
        Some(DeliveryState::Retrying)
    );

    // The first retry is due after 1s (SPEC_FULL retry schedule); wait for
    // it on a real clock rather than draining the full multi-hour schedule.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    dispatcher.retry_due_deliveries(&events).await;
    assert_eq!(
        dispatcher.delivery_state("sub-1", &event.id.to_string()),
        Some(DeliveryState::Retrying)
    );

    let deadlettered_so_far =
        events.all().into_iter().filter(|e| e.event_type == event_types::WEBHOOK_DEADLETTERED).count();
    assert_eq!(deadlettered_so_far, 0);
}
