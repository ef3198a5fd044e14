use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PullKey, TokenUsage, UsageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Trigger {
    #[default]
    TestFailure,
}

impl Trigger {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TestFailure => "test_failure",
        }
    }
}

impl TryFrom<&str> for Trigger {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        match value {
            "test_failure" => Ok(Self::TestFailure),
            _ => Err(format!("Unknown trigger: {value}")),
        }
    }
}

/// Persisted row for one remediation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: UsageId,
    pub key: PullKey,
    pub trigger: Trigger,
    pub created_at: DateTime<Utc>,
    pub is_completed: bool,
    pub tokens: TokenUsage,
    pub total_seconds: u64,
    pub original_error_log: Option<String>,
    pub minimized_error_log: Option<String>,
    pub retry_workflow_id_hash_pairs: Vec<String>,
}

/// Insert payload for a new, not-yet-completed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUsage {
    pub key: PullKey,
    pub trigger: Trigger,
    pub installation_id: u64,
    pub owner_name: String,
    pub repo_name: String,
}

/// Final totals written exactly once when an attempt ends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsageCompletion {
    pub tokens: TokenUsage,
    pub total_seconds: u64,
    pub retry_workflow_id_hash_pairs: Option<Vec<String>>,
    pub original_error_log: Option<String>,
    pub minimized_error_log: Option<String>,
}

/// Per-repository switches owned by the settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySettings {
    pub repo_id: u64,
    pub trigger_on_test_failure: bool,
    /// Free-form repository rules handed to the agent.
    pub rules: Option<String>,
}
