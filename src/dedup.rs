//! Retry fingerprints: `workflow_id:sha256(cleaned_log)`.
//!
//! A fingerprint is appended to the pull request's persisted set the first
//! time a (workflow, error) pair is attempted and is never removed, so an
//! unfixable error is attempted once per pull request.

use crate::ports::FingerprintStore;
use crate::{PullKey, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;
use url::Url;

/// Where a failed check run's logs live, parsed from its details URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSource {
    /// `https://github.com/<owner>/<repo>/actions/runs/<run_id>/job/<job_id>`
    GitHubActions { run_id: u64, job_id: Option<u64> },
    /// `https://app.circleci.com/pipelines/<vcs>/<org>/<repo>/<n>/workflows/<id>`
    CircleCi {
        project_slug: String,
        workflow_id: String,
    },
}

impl FailureSource {
    /// Returns `None` for providers the pipeline does not remediate.
    #[must_use]
    pub fn from_details_url(details_url: &str) -> Option<Self> {
        let url = Url::parse(details_url).ok()?;
        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        let host = url.host_str()?;

        if host.ends_with("circleci.com") {
            return Self::parse_circleci(&segments);
        }
        Self::parse_github_actions(&segments)
    }

    fn parse_github_actions(segments: &[&str]) -> Option<Self> {
        let runs_at = segments
            .windows(2)
            .position(|pair| pair == ["actions", "runs"])?;
        let run_id = segments.get(runs_at + 2)?.parse::<u64>().ok()?;
        let job_id = match (segments.get(runs_at + 3), segments.get(runs_at + 4)) {
            (Some(&"job"), Some(job)) => job.parse::<u64>().ok(),
            _ => None,
        };
        Some(Self::GitHubActions { run_id, job_id })
    }

    fn parse_circleci(segments: &[&str]) -> Option<Self> {
        let pipelines_at = segments.iter().position(|s| *s == "pipelines")?;
        let slug_parts = segments.get(pipelines_at + 1..pipelines_at + 4)?;
        let workflows_at = segments.iter().position(|s| *s == "workflows")?;
        let workflow_id = segments.get(workflows_at + 1)?;
        Some(Self::CircleCi {
            project_slug: slug_parts.join("/"),
            workflow_id: (*workflow_id).to_string(),
        })
    }

    #[must_use]
    pub fn workflow_id(&self) -> String {
        match self {
            Self::GitHubActions { run_id, .. } => run_id.to_string(),
            Self::CircleCi { workflow_id, .. } => workflow_id.clone(),
        }
    }
}

impl fmt::Display for FailureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitHubActions { run_id, .. } => write!(f, "github-actions run {run_id}"),
            Self::CircleCi { workflow_id, .. } => write!(f, "circleci workflow {workflow_id}"),
        }
    }
}

/// Deterministic one-way fingerprint of a failure.
#[must_use]
pub fn fingerprint(workflow_id: &str, cleaned_log: &str) -> String {
    let digest = Sha256::digest(cleaned_log.as_bytes());
    format!("{workflow_id}:{digest:x}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupCheck {
    pub duplicate: bool,
    /// The pull request's stored fingerprints at the time of the check.
    pub known: Vec<String>,
}

pub struct DedupGuard<'a, S> {
    store: &'a S,
}

impl<'a, S> DedupGuard<'a, S>
where
    S: FingerprintStore + Sync,
{
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// # Errors
    /// Returns any persistence failure.
    pub async fn check(&self, key: PullKey, fingerprint: &str) -> Result<DedupCheck> {
        let known = self.store.get_retry_fingerprints(key).await?;
        let duplicate = known.iter().any(|existing| existing == fingerprint);
        debug!(%key, fingerprint, duplicate, "Checked retry fingerprint");
        Ok(DedupCheck { duplicate, known })
    }

    /// # Errors
    /// Returns any persistence failure.
    pub async fn is_duplicate(&self, key: PullKey, fingerprint: &str) -> Result<bool> {
        self.check(key, fingerprint).await.map(|check| check.duplicate)
    }

    /// Appends the fingerprint; repeated or concurrent calls store it once.
    ///
    /// # Errors
    /// Returns any persistence failure.
    pub async fn record(&self, key: PullKey, fingerprint: &str) -> Result<bool> {
        let inserted = self.store.append_retry_fingerprint(key, fingerprint).await?;
        debug!(%key, fingerprint, inserted, "Recorded retry fingerprint");
        Ok(inserted)
    }
}
