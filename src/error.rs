//! Per-subsystem error types.
//!
//! Library code returns these typed errors; command-level code wraps them in
//! `anyhow::Context` for operator-facing messages.

use thiserror::Error;

/// Errors surfaced by the Orchestrator Gateway adapter (§4.1).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("transient orchestrator error: {0}")]
    Transient(String),
    #[error("conflict applying workload: {0}")]
    Conflict(String),
    #[error("permanent orchestrator error: {0}")]
    Permanent(String),
    #[error("workload not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// Errors raised while reconciling a single service.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("orchestrator error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("health gate failed: {0}")]
    HealthGateFailed(String),
    #[error("rollback failed: {0}")]
    RollbackFailed(String),
    #[error("internal invariant violated: {0}")]
    InternalInconsistency(String),
    #[error("strategy timed out after {0:?}")]
    StrategyTimeout(std::time::Duration),
}

/// Errors raised by the Build Queue.
#[derive(Debug, Error)]
pub enum BuildQueueError {
    #[error("lease held by another worker")]
    LeaseConflict,
    #[error("lease expired")]
    LeaseExpired,
    #[error("build not found: {0}")]
    NotFound(String),
    #[error("tenant concurrency cap reached")]
    TenantCapReached,
    #[error("global concurrency cap reached")]
    GlobalCapReached,
}

/// Errors raised by the Usage & Budget Gate.
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("budget exceeded for tenant {tenant}: projected {projected:.2} > cap {cap:.2}")]
    Exceeded {
        tenant: String,
        projected: f64,
        cap: f64,
    },
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
}

/// Errors raised by the Webhook Dispatcher.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),
    #[error("signing error: {0}")]
    Signing(String),
}

/// Unifying error for code paths that cross subsystem boundaries (e.g. the
/// reconciler calling into the Build Queue or Budget Gate).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    BuildQueue(#[from] BuildQueueError),
    #[error(transparent)]
    Budget(#[from] BudgetError),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
}
