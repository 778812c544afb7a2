//! MultiRegion Reconciler: composes per-region Service declarations,
//! evaluates regional health, and applies weighted/latency/geo routing with
//! failover (SPEC_FULL §4.5). The aggregation shape is grounded in
//! `multi_cluster.rs`'s `ClusterEvaluation`/`aggregate_report`
//! (pod-count-weighted averaging across kubeconfig contexts), generalized
//! here from "kubeconfig context health" to "region health probe" and from
//! a weighted average to a weighted traffic split.

use std::collections::BTreeMap;

use crate::model::{FailoverPolicy, RegionConfig, RegionHealth, TrafficPolicyStrategy};

/// The global route program computed across all configured regions: each
/// entry is `(region, weight)`, weights summing to 100 whenever at least
/// one region is healthy (SPEC_FULL §4.5 invariant).
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRouteProgram {
    pub weights: Vec<(String, u8)>,
}

impl RegionRouteProgram {
    pub fn weights_valid(&self) -> bool {
        self.weights.iter().map(|(_, w)| *w as u32).sum::<u32>() == 100
    }
}

/// Evaluates per-region health against configured weights and a traffic
/// policy, producing the route program the Gateway should be programmed
/// with. Read-only and side-effect free: the caller is responsible for
/// calling `OrchestratorGateway::program_route` with the result and for
/// retaining `last_known` across calls (fail-static requirement).
pub fn compute_route_program(
    regions: &[RegionConfig],
    health: &BTreeMap<String, RegionHealth>,
    strategy: TrafficPolicyStrategy,
    failover: &FailoverPolicy,
    last_known: Option<&RegionRouteProgram>,
) -> RegionRouteProgram {
    let enabled: Vec<&RegionConfig> = regions.iter().filter(|r| r.enabled).collect();
    if enabled.is_empty() {
        return last_known.cloned().unwrap_or(RegionRouteProgram { weights: vec![] });
    }

    let is_healthy = |region: &str| health.get(region).map(|h| h.healthy).unwrap_or(false);
    let any_healthy = enabled.iter().any(|r| is_healthy(&r.region));

    // SPEC_FULL §4.5 invariant: if every region is unhealthy, retain the
    // last known weights rather than producing an all-zero program.
    if !any_healthy {
        return last_known
            .cloned()
            .unwrap_or_else(|| even_split(&enabled.iter().map(|r| r.region.clone()).collect::<Vec<_>>()));
    }

    match strategy {
        TrafficPolicyStrategy::Weighted => weighted_program(&enabled, &is_healthy),
        TrafficPolicyStrategy::Latency => latency_program(&enabled, health, &is_healthy),
        TrafficPolicyStrategy::Geo => geo_program(&enabled, failover, &is_healthy),
    }
}

fn even_split(regions: &[String]) -> RegionRouteProgram {
    if regions.is_empty() {
        return RegionRouteProgram { weights: vec![] };
    }
    let base = 100 / regions.len() as u8;
    let mut remainder = 100 - base * regions.len() as u8;
    let weights = regions
        .iter()
        .map(|r| {
            let extra = if remainder > 0 {
                remainder -= 1;
                1
            } else {
                0
            };
            (r.clone(), base + extra)
        })
        .collect();
    RegionRouteProgram { weights }
}

fn weighted_program(
    enabled: &[&RegionConfig],
    is_healthy: &dyn Fn(&str) -> bool,
) -> RegionRouteProgram {
    let healthy_total: u32 = enabled
        .iter()
        .filter(|r| is_healthy(&r.region))
        .map(|r| r.weight as u32)
        .sum();
    if healthy_total == 0 {
        return even_split(
            &enabled
                .iter()
                .filter(|r| is_healthy(&r.region))
                .map(|r| r.region.clone())
                .collect::<Vec<_>>(),
        );
    }
    distribute_proportionally(enabled, |r| {
        if is_healthy(&r.region) {
            r.weight as f64
        } else {
            0.0
        }
    })
}

fn latency_program(
    enabled: &[&RegionConfig],
    health: &BTreeMap<String, RegionHealth>,
    is_healthy: &dyn Fn(&str) -> bool,
) -> RegionRouteProgram {
    distribute_proportionally(enabled, |r| {
        if !is_healthy(&r.region) {
            return 0.0;
        }
        let latency = health.get(&r.region).map(|h| h.latency_ms).unwrap_or(1.0).max(1.0);
        r.weight as f64 / latency
    })
}

fn geo_program(
    enabled: &[&RegionConfig],
    failover: &FailoverPolicy,
    is_healthy: &dyn Fn(&str) -> bool,
) -> RegionRouteProgram {
    // Geo routing is a static per-client mapping; as a single global route
    // program it collapses to "serve from the primary, or the first
    // healthy fallback" (SPEC_FULL §4.5: "unhealthy regions fall through
    // to the next in the failover list").
    let candidates = std::iter::once(failover.primary.clone()).chain(failover.fallbacks.iter().cloned());
    for region in candidates {
        if enabled.iter().any(|r| r.region == region) && is_healthy(&region) {
            return RegionRouteProgram {
                weights: vec![(region, 100)],
            };
        }
    }
    RegionRouteProgram { weights: vec![] }
}

fn distribute_proportionally(
    enabled: &[&RegionConfig],
    score: impl Fn(&RegionConfig) -> f64,
) -> RegionRouteProgram {
    let scores: Vec<(String, f64)> = enabled.iter().map(|r| (r.region.clone(), score(r))).collect();
    let total: f64 = scores.iter().map(|(_, s)| s).sum();
    if total <= 0.0 {
        return RegionRouteProgram { weights: vec![] };
    }
    let mut weights: Vec<(String, u8)> = scores
        .iter()
        .map(|(region, s)| (region.clone(), ((s / total) * 100.0).floor() as u8))
        .collect();
    let assigned: u32 = weights.iter().map(|(_, w)| *w as u32).sum();
    let mut remainder = 100u32.saturating_sub(assigned);
    // Distribute rounding remainder to the highest-scoring regions first so
    // the total is always exactly 100 (SPEC_FULL §8 weight-sum invariant).
    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| scores[b].1.partial_cmp(&scores[a].1).unwrap());
    for &idx in order.iter() {
        if remainder == 0 {
            break;
        }
        weights[idx].1 += 1;
        remainder -= 1;
    }
    RegionRouteProgram { weights }
}

/// Aggregates per-region healthy/unhealthy counts into a summary used for
/// alerting and status reporting; mirrors `multi_cluster.rs`'s
/// `MultiClusterReport` shape.
#[derive(Debug, Clone)]
pub struct MultiRegionReport {
    pub route_program: RegionRouteProgram,
    pub healthy_regions: Vec<String>,
    pub unhealthy_regions: Vec<String>,
}

pub fn build_report(
    regions: &[RegionConfig],
    health: &BTreeMap<String, RegionHealth>,
    strategy: TrafficPolicyStrategy,
    failover: &FailoverPolicy,
    last_known: Option<&RegionRouteProgram>,
) -> MultiRegionReport {
    let route_program = compute_route_program(regions, health, strategy, failover, last_known);
    let mut healthy_regions = Vec::new();
    let mut unhealthy_regions = Vec::new();
    for region in regions.iter().filter(|r| r.enabled) {
        if health.get(&region.region).map(|h| h.healthy).unwrap_or(false) {
            healthy_regions.push(region.region.clone());
        } else {
            unhealthy_regions.push(region.region.clone());
        }
    }
    MultiRegionReport {
        route_program,
        healthy_regions,
        unhealthy_regions,
    }
}
