//! ServiceRevision: immutable snapshot of a ServiceSpec at promotion time (SPEC_FULL §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRevision {
    pub tenant_id: String,
    pub service_name: String,
    pub revision: u64,
    pub image_digest: String,
    pub created_at: DateTime<Utc>,
    pub origin_build_id: String,
}

/// Linear per-service history; only the two most recent revisions are
/// retained for rollback (SPEC_FULL §3).
#[derive(Debug, Clone, Default)]
pub struct RevisionHistory {
    revisions: Vec<ServiceRevision>,
}

impl RevisionHistory {
    pub fn push(&mut self, revision: ServiceRevision) {
        self.revisions.push(revision);
        self.revisions.sort_by_key(|r| r.revision);
        while self.revisions.len() > 2 {
            self.revisions.remove(0);
        }
    }

    pub fn latest(&self) -> Option<&ServiceRevision> {
        self.revisions.last()
    }

    /// The revision to roll back to: the most recent one before `latest`.
    pub fn rollback_target(&self) -> Option<&ServiceRevision> {
        if self.revisions.len() < 2 {
            None
        } else {
            self.revisions.get(self.revisions.len() - 2)
        }
    }

    pub fn next_revision_number(&self) -> u64 {
        self.latest().map(|r| r.revision + 1).unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(n: u64) -> ServiceRevision {
        ServiceRevision {
            tenant_id: "t1".into(),
            service_name: "svc-a".into(),
            revision: n,
            image_digest: format!("sha256:{n:064x}"),
            created_at: Utc::now(),
            origin_build_id: format!("build-{n}"),
        }
    }

    #[test]
    fn retains_only_two_most_recent() {
        let mut history = RevisionHistory::default();
        history.push(rev(1));
        history.push(rev(2));
        history.push(rev(3));
        assert_eq!(history.latest().unwrap().revision, 3);
        assert_eq!(history.rollback_target().unwrap().revision, 2);
    }

    #[test]
    fn no_rollback_target_with_single_revision() {
        let mut history = RevisionHistory::default();
        history.push(rev(1));
        assert!(history.rollback_target().is_none());
    }

    #[test]
    fn next_revision_number_starts_at_one() {
        let history = RevisionHistory::default();
        assert_eq!(history.next_revision_number(), 1);
    }
}
