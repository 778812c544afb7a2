//! Data model entities (SPEC_FULL §3, §3.1). Each submodule owns one entity,
//! mirroring this codebase's split of `DevOpsPolicy`/`PolicyAuditResult` into
//! focused, independently testable struct groups.

pub mod attempt;
pub mod budget;
pub mod build;
pub mod event;
pub mod region;
pub mod revision;
pub mod service_spec;
pub mod webhook;

pub use attempt::{AttemptState, DeploymentAttempt, FailureReason, TrafficStep};
pub use budget::{BudgetCap, BudgetEvent, BudgetThresholdSentinel, PeriodSummary, UsageMetric};
pub use build::{Build, BuildStatus, FailureDetail};
pub use event::{event_types, Event, ResourceRef};
pub use region::{FailoverPolicy, RegionConfig, RegionHealth, TrafficPolicy, TrafficPolicyStrategy};
pub use revision::{RevisionHistory, ServiceRevision};
pub use service_spec::{
    AutoscaleSpec, BlueGreenParams, CanaryParams, EnvValue, HealthCheckSpec, HealthGateSpec,
    ResourceSpec, ServiceSpec, StrategyKind, StrategySpec, SwitchStrategy,
};
pub use webhook::{DeliveryState, WebhookDelivery, WebhookSubscription};
