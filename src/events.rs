//! Event Bus: internal fan-out of deployment/build lifecycle events to the
//! webhook dispatcher and the audit log (SPEC_FULL §4.9). Grounded in the
//! `ulid::Ulid`-keyed deployment events used for build/deployment lifecycle
//! notifications elsewhere in this ecosystem; the fan-out shape generalizes
//! this codebase's pattern of updating a Prometheus gauge per reconcile
//! transition in this codebase's reconcile loop into appending a durable `Event` and
//! handing a clone to every subscriber channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::model::{Event, ResourceRef};

/// Durable append-only event log plus live fan-out. A single `EventBus` is
/// constructed once per process and shared by every subsystem that produces
/// or consumes events (SPEC_FULL §9: "No ambient singletons; each subsystem
/// is constructed with its dependencies").
pub struct EventBus {
    log: Mutex<Vec<Event>>,
    sequence: AtomicU64,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Appends a new event to the durable log and fans it out to every live
    /// subscriber. Slow or dropped subscribers never block the publisher:
    /// sends are best-effort and a closed receiver is simply dropped from
    /// the subscriber list on the next publish.
    pub fn publish(
        &self,
        event_type: impl Into<String>,
        tenant_id: impl Into<String>,
        resource: ResourceRef,
        data: serde_json::Value,
    ) -> Event {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event::new(event_type, tenant_id, resource, data, sequence);

        self.log.lock().unwrap().push(event.clone());

        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(event_type = %event.event_type, sequence, "event_published");

        event
    }

    /// Registers a new fan-out subscriber (e.g. the webhook dispatcher or an
    /// audit sink), returning a channel that receives every event published
    /// from this point on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Full durable log, oldest first. Used by the audit sink and tests;
    /// a production deployment would page this out of the `events` table
    /// (SPEC_FULL §6 persisted state layout) instead of holding it in memory.
    pub fn all(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event_types;

    fn resource(id: &str) -> ResourceRef {
        ResourceRef {
            kind: "service".into(),
            id: id.into(),
        }
    }

    #[test]
    fn publish_assigns_monotonic_sequence() {
        let bus = EventBus::new();
        let a = bus.publish(event_types::DEPLOYMENT_STARTED, "t1", resource("svc-a"), serde_json::json!({}));
        let b = bus.publish(event_types::DEPLOYMENT_SUCCEEDED, "t1", resource("svc-a"), serde_json::json!({}));
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn subscriber_receives_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(event_types::BUILD_QUEUED, "t1", resource("build-1"), serde_json::json!({}));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.event_type, event_types::BUILD_QUEUED);
    }

    #[test]
    fn dropped_subscriber_does_not_block_publish() {
        let bus = EventBus::new();
        {
            let _rx = bus.subscribe();
        } // receiver dropped immediately
        bus.publish(event_types::TEST, "t1", resource("x"), serde_json::json!({}));
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(event_types::SERVICE_CREATED, "t1", resource("svc-a"), serde_json::json!({}));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
