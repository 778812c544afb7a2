//! DeploymentAttempt: one reconciliation episode advancing a service between
//! revisions (SPEC_FULL §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::service_spec::StrategyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptState {
    Pending,
    Building,
    Validating,
    Shifting,
    Observing,
    Committed,
    RolledBack,
    Failed,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Committed | AttemptState::RolledBack | AttemptState::Failed
        )
    }
}

/// One point in a traffic program: hold `weight` for `dwell_seconds` before
/// the next shift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficStep {
    pub weight: u8,
    pub dwell_seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    BuildFailed,
    AdmissionRejected,
    OrchestratorPermanent,
    HealthGateFailed,
    RollbackFailed,
    InternalInconsistency,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentAttempt {
    pub id: Ulid,
    pub tenant_id: String,
    pub service_name: String,
    pub from_revision: Option<u64>,
    pub to_revision: u64,
    pub target_hash: String,
    pub strategy: StrategyKind,
    pub state: AttemptState,
    pub traffic_program: Vec<TrafficStep>,
    pub current_weight: u8,
    pub consecutive_bad_windows: u32,
    pub rollback_reason: Option<FailureReason>,
    /// Persisted resume point for an in-flight traffic shift dwell
    /// (SPEC_FULL §7, §9: "each dwell is a persistent record (attemptId,
    /// resumeAt) that the reconciler's scheduler picks up at its tick").
    /// `None` means no dwell is pending; a strategy step that sees `now <
    /// resume_at` must no-op rather than advance to the next traffic step.
    pub resume_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentAttempt {
    pub fn new(
        tenant_id: impl Into<String>,
        service_name: impl Into<String>,
        from_revision: Option<u64>,
        to_revision: u64,
        target_hash: impl Into<String>,
        strategy: StrategyKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            tenant_id: tenant_id.into(),
            service_name: service_name.into(),
            from_revision,
            to_revision,
            target_hash: target_hash.into(),
            strategy,
            state: AttemptState::Pending,
            traffic_program: Vec::new(),
            current_weight: 0,
            consecutive_bad_windows: 0,
            rollback_reason: None,
            resume_at: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// True while a traffic shift dwell is still pending at `now`.
    pub fn is_dwelling(&self, now: DateTime<Utc>) -> bool {
        self.resume_at.is_some_and(|resume_at| now < resume_at)
    }

    /// Transitions to a new state. Terminal states are immutable (SPEC_FULL
    /// §3, §8): once terminal, further transitions are rejected.
    pub fn transition(&mut self, next: AttemptState, now: DateTime<Utc>) -> Result<(), String> {
        if self.state.is_terminal() {
            return Err(format!(
                "attempt {} is terminal ({:?}); cannot transition to {:?}",
                self.id, self.state, next
            ));
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, reason: FailureReason, now: DateTime<Utc>) -> Result<(), String> {
        self.rollback_reason = Some(reason);
        self.transition(AttemptState::Failed, now)
    }

    pub fn roll_back(&mut self, reason: FailureReason, now: DateTime<Utc>) -> Result<(), String> {
        self.rollback_reason = Some(reason);
        self.transition(AttemptState::RolledBack, now)
    }

    pub fn commit(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        self.transition(AttemptState::Committed, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_attempt() -> DeploymentAttempt {
        DeploymentAttempt::new(
            "t1",
            "svc-a",
            Some(1),
            2,
            "hash-1",
            StrategyKind::Canary,
            Utc::now(),
        )
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut attempt = new_attempt();
        attempt.commit(Utc::now()).unwrap();
        assert!(attempt.state.is_terminal());
        let err = attempt.transition(AttemptState::Observing, Utc::now());
        assert!(err.is_err());
        assert_eq!(attempt.state, AttemptState::Committed);
    }

    #[test]
    fn roll_back_records_reason() {
        let mut attempt = new_attempt();
        attempt
            .roll_back(FailureReason::HealthGateFailed, Utc::now())
            .unwrap();
        assert_eq!(attempt.state, AttemptState::RolledBack);
        assert_eq!(attempt.rollback_reason, Some(FailureReason::HealthGateFailed));
    }

    #[test]
    fn non_terminal_transitions_allowed_in_sequence() {
        let mut attempt = new_attempt();
        for state in [
            AttemptState::Building,
            AttemptState::Validating,
            AttemptState::Shifting,
            AttemptState::Observing,
        ] {
            attempt.transition(state, Utc::now()).unwrap();
        }
        assert_eq!(attempt.state, AttemptState::Observing);
    }
}
