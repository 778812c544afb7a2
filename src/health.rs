//! Health Evaluator: evaluates a rollout against configurable SLO gates over
//! a sliding window (SPEC_FULL §4.2). The scoring/classification shape is
//! grounded in `governance.rs`'s `calculate_health_score`/`classify_health`
//! (aggregate per-bucket samples, classify against thresholds), generalized
//! from pod-policy violations to SLO-gate bad-samples.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::HealthGateSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Healthy,
    Unhealthy,
    Unknown,
}

/// One window's worth of aggregated metrics from the metrics source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub requests: u64,
    pub errors: u64,
    pub p95_latency_ms: u32,
    pub bucket_start: DateTime<Utc>,
}

impl MetricSample {
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors as f64 / self.requests as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        1.0 - self.error_rate()
    }

    pub fn is_bad(&self, gate: &HealthGateSpec) -> bool {
        self.error_rate() > gate.max_error_rate
            || self.p95_latency_ms > gate.max_p95_latency_ms
            || self.success_rate() < gate.min_success_rate
    }
}

/// Abstract metrics provider. Production binds this to whichever telemetry
/// backend is deployed; tests use an in-memory implementation. This is the
/// Open Question decision recorded in SPEC_FULL §9.
pub trait MetricsSource: Send + Sync {
    /// Returns samples covering `window_seconds` up to now, or as many as
    /// are available. An empty/partial result signals missing telemetry.
    fn samples(&self, window_seconds: u32) -> Vec<MetricSample>;

    /// How many buckets *should* exist for a full window, used to detect
    /// "insufficient data for at least half the window" (SPEC_FULL §4.2).
    fn expected_bucket_count(&self, window_seconds: u32) -> u32;
}

/// A fixed-size ring buffer of verdicts-per-bucket, keyed implicitly by
/// arrival order (oldest evicted first), matching SPEC_FULL §4.2's
/// "ring buffer keyed by time bucket".
pub struct HealthEvaluator {
    ring: VecDeque<bool>,
    capacity: usize,
}

pub struct EvaluationResult {
    pub verdict: Verdict,
    pub consecutive_bad: u32,
    pub rationale: String,
}

impl HealthEvaluator {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            ring: VecDeque::new(),
            capacity: failure_threshold.max(1) as usize,
        }
    }

    pub fn evaluate(&mut self, source: &dyn MetricsSource, gate: &HealthGateSpec) -> EvaluationResult {
        let samples = source.samples(gate.window_seconds);
        let expected = source.expected_bucket_count(gate.window_seconds).max(1);

        if samples.len() < (expected as usize).div_ceil(2) {
            return EvaluationResult {
                verdict: Verdict::Unknown,
                consecutive_bad: 0,
                rationale: format!(
                    "insufficient data: {} of {} expected buckets",
                    samples.len(),
                    expected
                ),
            };
        }

        for sample in &samples {
            let bad = sample.is_bad(gate);
            self.push(bad);
        }

        let consecutive_bad = self.consecutive_bad_count();
        if consecutive_bad >= gate.failure_threshold {
            EvaluationResult {
                verdict: Verdict::Unhealthy,
                consecutive_bad,
                rationale: format!(
                    "{consecutive_bad} consecutive bad windows >= failureThreshold {}",
                    gate.failure_threshold
                ),
            }
        } else {
            EvaluationResult {
                verdict: Verdict::Healthy,
                consecutive_bad,
                rationale: "within SLO gate thresholds".to_string(),
            }
        }
    }

    fn push(&mut self, bad: bool) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(bad);
    }

    /// Count of consecutive `true` (bad) entries at the tail of the ring.
    fn consecutive_bad_count(&self) -> u32 {
        let mut count = 0;
        for &bad in self.ring.iter().rev() {
            if bad {
                count += 1;
            } else {
                break;
            }
        }
        count
    }
}

/// Stateless single-tick gate check used by the reconciler's strategies,
/// which persist `consecutive_bad` on the `DeploymentAttempt` itself rather
/// than in a separate evaluator instance (SPEC_FULL §4.4 crash-safety:
/// the attempt record is the single source of truth that gets persisted).
/// A sample of `None` (no data this tick) neither increments nor resets the
/// streak, and reports `Unknown`.
pub fn evaluate_tick(
    sample: Option<&MetricSample>,
    gate: &HealthGateSpec,
    consecutive_bad: &mut u32,
) -> Verdict {
    match sample {
        None => Verdict::Unknown,
        Some(sample) => {
            if sample.is_bad(gate) {
                *consecutive_bad += 1;
            } else {
                *consecutive_bad = 0;
            }
            if *consecutive_bad >= gate.failure_threshold {
                Verdict::Unhealthy
            } else {
                Verdict::Healthy
            }
        }
    }
}

/// Deterministic in-memory metrics source for tests and the in-process
/// reconciler loop against the `InMemoryGateway`.
pub struct FixedMetricsSource {
    pub bucket_seconds: u32,
    pub samples: Vec<MetricSample>,
}

impl MetricsSource for FixedMetricsSource {
    fn samples(&self, window_seconds: u32) -> Vec<MetricSample> {
        let wanted = (window_seconds / self.bucket_seconds.max(1)).max(1) as usize;
        self.samples
            .iter()
            .rev()
            .take(wanted)
            .rev()
            .cloned()
            .collect()
    }

    fn expected_bucket_count(&self, window_seconds: u32) -> u32 {
        (window_seconds / self.bucket_seconds.max(1)).max(1)
    }
}
