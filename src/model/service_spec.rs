//! ServiceSpec: declared desired state, keyed by (tenantId, name). See SPEC_FULL §3, §6.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceSpec {
    pub tenant_id: String,
    pub name: String,
    pub image: String,
    pub ports: Vec<i32>,
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
    pub resources: ResourceSpec,
    pub autoscale: AutoscaleSpec,
    pub health_check: HealthCheckSpec,
    pub strategy: StrategySpec,
    pub health_gate: HealthGateSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    FromSecret { from_secret: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceSpec {
    pub cpu: String,
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutoscaleSpec {
    pub min: u32,
    pub max: u32,
    pub cpu: u32,
    pub rps: u32,
}

impl AutoscaleSpec {
    /// `min == max` disables autoscaling (SPEC_FULL §8 boundary behavior).
    pub fn autoscaling_disabled(&self) -> bool {
        self.min == self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthCheckSpec {
    pub path: String,
    pub port: i32,
    pub initial_delay_seconds: u32,
    pub period_seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    Rolling,
    Canary,
    #[serde(rename = "blueGreen")]
    BlueGreen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StrategySpec {
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blue_green: Option<BlueGreenParams>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CanaryParams {
    pub initial_weight: u8,
    pub observation_time_seconds: u32,
    pub auto_promote: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SwitchStrategy {
    Immediate,
    Gradual,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlueGreenParams {
    pub switch_strategy: SwitchStrategy,
    pub switch_duration_seconds: u32,
    pub validation_period_seconds: u32,
    pub rollback_on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthGateSpec {
    pub enabled: bool,
    pub max_error_rate: f64,
    pub max_p95_latency_ms: u32,
    pub min_success_rate: f64,
    pub window_seconds: u32,
    pub failure_threshold: u32,
}

impl ServiceSpec {
    /// Invariant: min <= max (SPEC_FULL §3).
    pub fn validate(&self) -> Result<(), String> {
        if self.autoscale.min > self.autoscale.max {
            return Err(format!(
                "autoscale.min ({}) must be <= autoscale.max ({})",
                self.autoscale.min, self.autoscale.max
            ));
        }
        Ok(())
    }

    /// Canonicalizes the spec to a stable JSON form and hashes it. Used by
    /// the reconciler's diff step (§4.4) to detect spec changes, and exactly
    /// satisfies the round-trip property in §8 ("canonicalize -> hash ->
    /// canonicalize is the identity") because canonicalization is
    /// idempotent: serde_json::Value's BTreeMap-backed object keys are
    /// already sorted.
    pub fn target_hash(&self) -> String {
        let canonical =
            serde_json::to_value(self).expect("ServiceSpec always serializes");
        let canonical_bytes =
            serde_json::to_vec(&canonical).expect("canonical value always serializes");
        let mut hasher = Sha256::new();
        hasher.update(&canonical_bytes);
        hex::encode(hasher.finalize())
    }
}
