//! Event: durable, signed notification of an externally observable state
//! change (SPEC_FULL §3.1, §4.9, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: String,
    pub resource: ResourceRef,
    pub data: serde_json::Value,
    /// Monotonic append-log position, used by the dispatcher and by clients
    /// resuming a fan-out from a known point.
    pub sequence: u64,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        tenant_id: impl Into<String>,
        resource: ResourceRef,
        data: serde_json::Value,
        sequence: u64,
    ) -> Self {
        Self {
            id: Ulid::new(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            tenant_id: tenant_id.into(),
            resource,
            data,
            sequence,
        }
    }
}

/// Canonical event types (SPEC_FULL §6). Kept as `&'static str` constants
/// rather than an enum so new subsystems can introduce event types without
/// a central match statement, mirroring how this codebase treats condition
/// strings as free-form but documented constants.
pub mod event_types {
    pub const DEPLOYMENT_STARTED: &str = "deployment.started";
    pub const DEPLOYMENT_PROGRESSING: &str = "deployment.progressing";
    pub const DEPLOYMENT_SUCCEEDED: &str = "deployment.succeeded";
    pub const DEPLOYMENT_FAILED: &str = "deployment.failed";
    pub const DEPLOYMENT_ROLLED_BACK: &str = "deployment.rolledBack";

    pub const BUILD_QUEUED: &str = "build.queued";
    pub const BUILD_STARTED: &str = "build.started";
    pub const BUILD_SUCCEEDED: &str = "build.succeeded";
    pub const BUILD_FAILED: &str = "build.failed";

    pub const SERVICE_CREATED: &str = "service.created";
    pub const SERVICE_UPDATED: &str = "service.updated";
    pub const SERVICE_DELETED: &str = "service.deleted";

    pub const BUDGET_WARNING: &str = "budget.warning";
    pub const BUDGET_EXCEEDED: &str = "budget.exceeded";

    pub const WEBHOOK_DEADLETTERED: &str = "webhook.deadlettered";

    pub const TEST: &str = "test";
}
