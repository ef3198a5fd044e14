//! Cheap, read-only preconditions evaluated before any side effect.

use crate::messages::{in_progress_marker, PERMISSION_DENIED_MESSAGE};
use crate::ports::{CodeHost, SettingsStore};
use crate::{CheckSuiteEvent, PullRequestLink, RepositorySettings, Result};
use std::fmt;
use tracing::info;

/// Why an event was dropped before a usage record was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardFailure {
    NoPullRequest,
    ForeignBranch { branch: String },
    SettingsMissing,
    TriggerDisabled,
    AlreadyInProgress,
    PermissionPending,
    NoFailedCheckRun,
    UnsupportedProvider { details_url: Option<String> },
    LogPermissionDenied,
    LogMissing,
}

impl fmt::Display for GuardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPullRequest => write!(f, "no pull request is associated with the check suite"),
            Self::ForeignBranch { branch } => {
                write!(f, "branch '{branch}' was not created by the bot")
            }
            Self::SettingsMissing => write!(f, "repository settings not found"),
            Self::TriggerDisabled => write!(f, "trigger_on_test_failure is disabled"),
            Self::AlreadyInProgress => write!(f, "an attempt for this check suite is in progress"),
            Self::PermissionPending => write!(f, "a permission request is pending"),
            Self::NoFailedCheckRun => write!(f, "the check suite has no failed check run"),
            Self::UnsupportedProvider { details_url } => write!(
                f,
                "unsupported CI provider: {}",
                details_url.as_deref().unwrap_or("<no details url>")
            ),
            Self::LogPermissionDenied => write!(f, "permission denied reading workflow logs"),
            Self::LogMissing => write!(f, "error log not found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed {
        pull_request: PullRequestLink,
        settings: RepositorySettings,
    },
    Rejected(GuardFailure),
}

pub struct WebhookGate<'a, H, S> {
    host: &'a H,
    settings: &'a S,
    branch_prefix: &'a str,
}

impl<'a, H, S> WebhookGate<'a, H, S>
where
    H: CodeHost + Sync,
    S: SettingsStore + Sync,
{
    #[must_use]
    pub const fn new(host: &'a H, settings: &'a S, branch_prefix: &'a str) -> Self {
        Self {
            host,
            settings,
            branch_prefix,
        }
    }

    /// Runs the guard chain in order and stops at the first failure.
    ///
    /// # Errors
    /// Returns a collaborator failure; a failed guard is `Ok(Rejected)`.
    pub async fn evaluate(&self, event: &CheckSuiteEvent) -> Result<GateDecision> {
        let Some(pull_request) = event.pull_request().cloned() else {
            return Ok(self.reject(event, GuardFailure::NoPullRequest));
        };

        if !event.head_branch.starts_with(self.branch_prefix) {
            return Ok(self.reject(
                event,
                GuardFailure::ForeignBranch {
                    branch: event.head_branch.clone(),
                },
            ));
        }

        let settings = match self
            .settings
            .get_repository_settings(event.repo.repo_id)
            .await?
        {
            None => return Ok(self.reject(event, GuardFailure::SettingsMissing)),
            Some(settings) if !settings.trigger_on_test_failure => {
                return Ok(self.reject(event, GuardFailure::TriggerDisabled));
            }
            Some(settings) => settings,
        };

        let needles = [in_progress_marker(event.id)];
        if self
            .host
            .has_comment_with_text(&event.repo, pull_request.number, &needles)
            .await?
        {
            return Ok(self.reject(event, GuardFailure::AlreadyInProgress));
        }

        let needles = [PERMISSION_DENIED_MESSAGE.to_string()];
        if self
            .host
            .has_comment_with_text(&event.repo, pull_request.number, &needles)
            .await?
        {
            return Ok(self.reject(event, GuardFailure::PermissionPending));
        }

        Ok(GateDecision::Proceed {
            pull_request,
            settings,
        })
    }

    fn reject(&self, event: &CheckSuiteEvent, failure: GuardFailure) -> GateDecision {
        info!(
            repo = %event.repo,
            check_suite_id = event.id,
            branch_prefix = self.branch_prefix,
            "Skipped - {failure}"
        );
        GateDecision::Rejected(failure)
    }
}
