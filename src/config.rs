//! Ambient configuration: env-var-driven with defaults matching the
//! teacher's hard-coded constants (`FINALIZER`/`REQUEUE_INTERVAL` in
//! this codebase's reconcile loop, the lease/backoff numbers implied by SPEC_FULL
//! §5). No config file format; every knob has a sane default so the
//! binaries run unconfigured in dev.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Reconciler process configuration (SPEC_FULL §4.4, §5).
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub lease_duration: Duration,
    pub tick_interval: Duration,
    pub metrics_addr: std::net::SocketAddr,
    pub rolling_timeout: Duration,
    pub canary_timeout: Duration,
    pub blue_green_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(env_or("ORBITCTL_LEASE_SECONDS", 30)),
            tick_interval: Duration::from_millis(env_or("ORBITCTL_TICK_MILLIS", 500)),
            metrics_addr: env_or("ORBITCTL_METRICS_ADDR", "0.0.0.0:9090".to_string())
                .parse()
                .unwrap_or_else(|_| ([0, 0, 0, 0], 9090).into()),
            rolling_timeout: Duration::from_secs(env_or("ORBITCTL_ROLLING_TIMEOUT_SECONDS", 900)),
            canary_timeout: Duration::from_secs(env_or("ORBITCTL_CANARY_TIMEOUT_SECONDS", 3600)),
            blue_green_timeout: Duration::from_secs(env_or(
                "ORBITCTL_BLUE_GREEN_TIMEOUT_SECONDS",
                1800,
            )),
        }
    }
}

/// Build Queue / Executor configuration (SPEC_FULL §4.6, §4.7).
#[derive(Debug, Clone)]
pub struct BuildQueueConfig {
    pub global_concurrency: usize,
    pub default_tenant_concurrency: usize,
    pub lease_ttl: Duration,
    pub max_attempts: u32,
}

impl Default for BuildQueueConfig {
    fn default() -> Self {
        Self {
            global_concurrency: env_or("ORBITCTL_BUILD_GLOBAL_CONCURRENCY", 8),
            default_tenant_concurrency: env_or("ORBITCTL_BUILD_TENANT_CONCURRENCY", 2),
            lease_ttl: Duration::from_secs(env_or("ORBITCTL_BUILD_LEASE_TTL_SECONDS", 600)),
            max_attempts: env_or("ORBITCTL_BUILD_MAX_ATTEMPTS", 3),
        }
    }
}

/// Usage & Budget Gate configuration (SPEC_FULL §4.8).
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub warning_threshold_percent: u8,
    pub critical_threshold_percent: u8,
    pub sampling_interval: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            warning_threshold_percent: env_or("ORBITCTL_BUDGET_WARNING_PERCENT", 80),
            critical_threshold_percent: env_or("ORBITCTL_BUDGET_CRITICAL_PERCENT", 100),
            sampling_interval: Duration::from_secs(env_or(
                "ORBITCTL_BUDGET_SAMPLE_INTERVAL_SECONDS",
                60,
            )),
        }
    }
}

/// Webhook Dispatcher configuration (SPEC_FULL §4.9).
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub delivery_timeout: Duration,
    pub metrics_addr: std::net::SocketAddr,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(env_or("ORBITCTL_WEBHOOK_TIMEOUT_SECONDS", 10)),
            metrics_addr: env_or("ORBITCTL_WEBHOOK_METRICS_ADDR", "0.0.0.0:9091".to_string())
                .parse()
                .unwrap_or_else(|_| ([0, 0, 0, 0], 9091).into()),
        }
    }
}

/// Build retention, SPEC_FULL §3 ("deleted only via retention policy,
/// default 30 days after terminal state").
pub fn build_retention_days() -> i64 {
    env_or("ORBITCTL_BUILD_RETENTION_DAYS", 30)
}
