//! RegionHealth and MultiRegion inputs (SPEC_FULL §3.1, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionHealth {
    pub region: String,
    pub healthy: bool,
    pub latency_ms: f64,
    pub consecutive_failures: u32,
    pub last_checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfig {
    pub region: String,
    pub weight: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas_override: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_override: Option<std::collections::BTreeMap<String, String>>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrafficPolicyStrategy {
    Weighted,
    Latency,
    Geo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverPolicy {
    pub primary: String,
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicy {
    pub strategy: TrafficPolicyStrategy,
    pub health_check_interval_seconds: u32,
    pub failover: FailoverPolicy,
}
