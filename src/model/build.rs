//! Build: (tenantId, repoUrl, commitSha) work item consumed by the Build
//! Queue / Build Executor (SPEC_FULL §3, §4.6, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: String,
    pub tenant_id: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub build_env: String,
    pub status: BuildStatus,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub image_digest: Option<String>,
    pub failure: Option<FailureDetail>,
}

impl Build {
    /// Content address per SPEC_FULL §3/§4.6: identical
    /// (tenant, repo, commit, buildEnv) collapse to one build id.
    pub fn content_address(tenant_id: &str, repo_url: &str, commit_sha: &str, build_env: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tenant_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(repo_url.as_bytes());
        hasher.update([0u8]);
        hasher.update(commit_sha.as_bytes());
        hasher.update([0u8]);
        hasher.update(build_env.as_bytes());
        format!("build-{}", hex::encode(hasher.finalize()))
    }

    pub fn new(tenant_id: impl Into<String>, repo_url: impl Into<String>, commit_sha: impl Into<String>, build_env: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        let repo_url = repo_url.into();
        let commit_sha = commit_sha.into();
        let build_env = build_env.into();
        let id = Self::content_address(&tenant_id, &repo_url, &commit_sha, &build_env);
        Self {
            id,
            tenant_id,
            repo_url,
            commit_sha,
            build_env,
            status: BuildStatus::Pending,
            attempts: 0,
            started_at: None,
            completed_at: None,
            image_digest: None,
            failure: None,
        }
    }
}
