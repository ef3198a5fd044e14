use serde::{Deserialize, Serialize};

use super::RepoRef;
use crate::error::{RemedyError, Result};

/// Raw `check_suite` webhook body, limited to the fields the pipeline reads.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckSuitePayload {
    pub action: Option<String>,
    pub check_suite: CheckSuite,
    pub repository: Repository,
    pub installation: Installation,
    pub sender: Option<Sender>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckSuite {
    pub id: u64,
    pub head_branch: Option<String>,
    pub head_sha: String,
    pub conclusion: Option<String>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestLink {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub owner: Owner,
    #[serde(default)]
    pub fork: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub id: u64,
    pub login: String,
    #[serde(rename = "type")]
    pub owner_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sender {
    pub id: u64,
    pub login: String,
}

/// One webhook delivery, reduced to what the remediation flow consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckSuiteEvent {
    pub id: u64,
    pub head_branch: String,
    pub head_sha: String,
    pub pull_requests: Vec<PullRequestLink>,
    pub repo: RepoRef,
    pub installation_id: u64,
}

impl CheckSuiteEvent {
    /// Parses a raw webhook body.
    ///
    /// # Errors
    /// Returns `RemedyError::SerializationError` when required fields are missing.
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str::<CheckSuitePayload>(body)
            .map(Self::from)
            .map_err(RemedyError::from)
    }

    /// The pull request this suite ran for; suites on plain pushes carry none.
    #[must_use]
    pub fn pull_request(&self) -> Option<&PullRequestLink> {
        self.pull_requests.first()
    }
}

impl From<CheckSuitePayload> for CheckSuiteEvent {
    fn from(payload: CheckSuitePayload) -> Self {
        let CheckSuitePayload {
            check_suite,
            repository,
            installation,
            ..
        } = payload;

        Self {
            id: check_suite.id,
            head_branch: check_suite.head_branch.unwrap_or_default(),
            head_sha: check_suite.head_sha,
            pull_requests: check_suite.pull_requests,
            repo: RepoRef {
                owner_id: repository.owner.id,
                owner_login: repository.owner.login,
                owner_type: repository.owner.owner_type,
                repo_id: repository.id,
                repo_name: repository.name,
            },
            installation_id: installation.id,
        }
    }
}

/// A failed check run belonging to a check suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    pub details_url: Option<String>,
    pub head_sha: String,
}
