//! The composed `check_suite` handler.
//!
//! One invocation walks the guard chain, fingerprints the failure, records a
//! usage row, arbitrates against concurrent attempts and finally runs the
//! remediation loop. Every usage row created here is finalized before
//! [`CheckSuiteHandler::handle`] returns.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]


use crate::dedup::{fingerprint, DedupGuard, FailureSource};
use crate::gate::{GateDecision, GuardFailure, WebhookGate};
use crate::ledger::{OpenUsage, UsageLedger};
use crate::logs::clean_logs;
use crate::messages::{
    already_attempted, branch_deleted, budget_exhausted, deferred_to_older, finished,
    log_not_found, no_changes, permission_request, pull_request_closed, unexpected_failure,
    STUMBLED_MESSAGE,
};
use crate::ports::{
    AgentClient, CodeHostPorts, LogFetch, Notifier, PersistencePorts, ToolContext,
};
use crate::progress::ProgressComment;
use crate::race::{RaceArbiter, RaceDecision};
use crate::remediation::{
    LoopOutcome, LoopSettings, LoopTarget, RemainingBudget, RemediationBrief, RemediationLoop,
    StopReason, WallClockBudget,
};
use crate::{
    CheckRun, CheckSuiteEvent, NewUsage, PullKey, PullRequestLink, RepositorySettings, Result,
    ThreadId, TokenUsage, Trigger, UsageCompletion, UsageId, UsageRecord,
};
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

const RETRIGGER_COMMIT_MESSAGE: &str = "Empty commit to trigger final tests";
const PROCESS_NAME: &str = "Check run processing";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub branch_prefix: String,
    pub execution_budget: Duration,
    pub loop_settings: LoopSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            branch_prefix: "gitauto/".to_string(),
            execution_budget: Duration::from_secs(900),
            loop_settings: LoopSettings::default(),
        }
    }
}

/// How one invocation ended. Only `Failed` reflects a hard error.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Skipped(GuardFailure),
    Duplicate {
        usage_id: UsageId,
        fingerprint: String,
    },
    RaceLost {
        usage_id: UsageId,
        older: UsageId,
    },
    Remediated {
        usage_id: UsageId,
        stop: StopReason,
        committed: bool,
        tokens: TokenUsage,
    },
    Failed {
        usage_id: Option<UsageId>,
        reason: String,
    },
}

impl PipelineOutcome {
    #[must_use]
    pub const fn usage_id(&self) -> Option<UsageId> {
        match self {
            Self::Skipped(_) => None,
            Self::Duplicate { usage_id, .. }
            | Self::RaceLost { usage_id, .. }
            | Self::Remediated { usage_id, .. } => Some(*usage_id),
            Self::Failed { usage_id, .. } => *usage_id,
        }
    }
}

/// A failed check run the pipeline knows how to read.
#[derive(Debug, Clone)]
struct LocatedRun {
    check_run: CheckRun,
    source: FailureSource,
}

/// The failure's logs and their fingerprint.
#[derive(Debug, Clone)]
struct FailureLog {
    raw: String,
    cleaned: String,
    fingerprint: String,
}

/// Everything an attempt needs once its usage row exists.
struct AttemptScope<'e> {
    event: &'e CheckSuiteEvent,
    pull_request: &'e PullRequestLink,
    settings: &'e RepositorySettings,
    run: &'e LocatedRun,
    log: &'e FailureLog,
    key: PullKey,
    usage_id: UsageId,
}

/// Values accumulated while an attempt runs; written on finalize.
#[derive(Debug, Default)]
struct Accrued {
    tokens: TokenUsage,
    pairs: Option<Vec<String>>,
}

/// How an attempt settled before finalization.
enum Settled {
    Duplicate { known: Vec<String> },
    RaceLost { older: UsageRecord },
    Finished(LoopOutcome),
}

pub struct CheckSuiteHandler<'a, H, P, A, N> {
    host: &'a H,
    store: &'a P,
    agent: &'a A,
    notifier: &'a N,
    settings: &'a PipelineSettings,
}

impl<'a, H, P, A, N> CheckSuiteHandler<'a, H, P, A, N>
where
    H: CodeHostPorts + Sync,
    P: PersistencePorts + Sync,
    A: AgentClient + Sync,
    N: Notifier + Sync,
{
    #[must_use]
    pub const fn new(
        host: &'a H,
        store: &'a P,
        agent: &'a A,
        notifier: &'a N,
        settings: &'a PipelineSettings,
    ) -> Self {
        Self {
            host,
            store,
            agent,
            notifier,
            settings,
        }
    }

    /// Handles one delivery against a fresh wall-clock budget.
    pub async fn handle(&self, event: &CheckSuiteEvent) -> PipelineOutcome {
        let budget = WallClockBudget::start(self.settings.execution_budget);
        self.handle_with_budget(event, &budget).await
    }

    pub async fn handle_with_budget(
        &self,
        event: &CheckSuiteEvent,
        budget: &dyn RemainingBudget,
    ) -> PipelineOutcome {
        let span = info_span!(
            "check_suite",
            correlation_id = %Uuid::new_v4(),
            repo_id = event.repo.repo_id,
            check_suite_id = event.id,
            pr_number = ?event.pull_request().map(|pr| pr.number),
        );
        self.run(event, budget).instrument(span).await
    }

    async fn run(&self, event: &CheckSuiteEvent, budget: &dyn RemainingBudget) -> PipelineOutcome {
        let started = Instant::now();

        let gate = WebhookGate::new(self.host, self.store, &self.settings.branch_prefix);
        let (pull_request, repo_settings) = match gate.evaluate(event).await {
            Ok(GateDecision::Proceed {
                pull_request,
                settings,
            }) => (pull_request, settings),
            Ok(GateDecision::Rejected(failure)) => return PipelineOutcome::Skipped(failure),
            Err(e) => return fail_early("Guard chain failed", &e),
        };

        let run = match self.locate_failed_run(event).await {
            Ok(Ok(run)) => run,
            Ok(Err(failure)) => {
                info!("Skipped - {failure}");
                return PipelineOutcome::Skipped(failure);
            }
            Err(e) => return fail_early("Failed to list check runs", &e),
        };
        let check_run_name = run.check_run.name.clone();

        let mut progress = match ProgressComment::create(
            self.host,
            &event.repo,
            pull_request.number,
            event.id,
            STUMBLED_MESSAGE,
        )
        .await
        {
            Ok(progress) => progress,
            Err(e) => return fail_early("Failed to create progress comment", &e),
        };
        let thread = self
            .notify(
                &format!(
                    "Check run `{check_run_name}` failed on {}#{}",
                    event.repo, pull_request.number
                ),
                None,
            )
            .await;

        let log = match self.host.get_workflow_run_logs(&event.repo, &run.source).await {
            Ok(LogFetch::Found(raw)) => {
                let cleaned = clean_logs(&raw);
                if cleaned.is_empty() {
                    return self
                        .skip_with_comment(
                            &mut progress,
                            thread.as_ref(),
                            log_not_found(),
                            GuardFailure::LogMissing,
                        )
                        .await;
                }
                let fingerprint = fingerprint(&run.source.workflow_id(), &cleaned);
                FailureLog {
                    raw,
                    cleaned,
                    fingerprint,
                }
            }
            Ok(LogFetch::PermissionDenied) => {
                let body = permission_request(
                    &event.repo.owner_type,
                    &event.repo.owner_login,
                    event.installation_id,
                );
                return self
                    .skip_with_comment(
                        &mut progress,
                        thread.as_ref(),
                        &body,
                        GuardFailure::LogPermissionDenied,
                    )
                    .await;
            }
            Ok(LogFetch::Missing) => {
                return self
                    .skip_with_comment(
                        &mut progress,
                        thread.as_ref(),
                        log_not_found(),
                        GuardFailure::LogMissing,
                    )
                    .await;
            }
            Err(e) => {
                progress.finish(&unexpected_failure(&check_run_name)).await;
                return fail_early("Failed to fetch workflow logs", &e);
            }
        };

        let key = PullKey::for_repo(&event.repo, pull_request.number);
        let ledger = UsageLedger::new(self.store);
        let new_usage = NewUsage {
            key,
            trigger: Trigger::TestFailure,
            installation_id: event.installation_id,
            owner_name: event.repo.owner_login.clone(),
            repo_name: event.repo.repo_name.clone(),
        };
        let open = match ledger.create(&new_usage, started).await {
            Ok(open) => open,
            Err(e) => {
                progress.finish(&unexpected_failure(&check_run_name)).await;
                return fail_early("Failed to create usage record", &e);
            }
        };

        let scope = AttemptScope {
            event,
            pull_request: &pull_request,
            settings: &repo_settings,
            run: &run,
            log: &log,
            key,
            usage_id: open.id(),
        };
        let mut accrued = Accrued::default();
        let settled = self
            .attempt(&scope, &mut progress, &mut accrued, budget)
            .await;

        self.settle(
            &ledger,
            open,
            &scope,
            settled,
            accrued,
            &mut progress,
            thread.as_ref(),
        )
        .await
    }

    /// First failed check run whose details URL names a supported provider.
    async fn locate_failed_run(
        &self,
        event: &CheckSuiteEvent,
    ) -> Result<std::result::Result<LocatedRun, GuardFailure>> {
        let runs = self.host.get_failed_check_runs(&event.repo, event.id).await?;
        let Some(first) = runs.first() else {
            return Ok(Err(GuardFailure::NoFailedCheckRun));
        };

        let located = runs.iter().find_map(|check_run| {
            check_run
                .details_url
                .as_deref()
                .and_then(FailureSource::from_details_url)
                .map(|source| LocatedRun {
                    check_run: check_run.clone(),
                    source,
                })
        });

        Ok(located.ok_or_else(|| GuardFailure::UnsupportedProvider {
            details_url: first.details_url.clone(),
        }))
    }

    async fn attempt(
        &self,
        scope: &AttemptScope<'_>,
        progress: &mut ProgressComment<'_, H>,
        accrued: &mut Accrued,
        budget: &dyn RemainingBudget,
    ) -> Result<Settled> {
        let dedup = DedupGuard::new(self.store);
        let check = dedup.check(scope.key, &scope.log.fingerprint).await?;
        if check.duplicate {
            info!(fingerprint = %scope.log.fingerprint, "Error already attempted");
            return Ok(Settled::Duplicate { known: check.known });
        }

        if let RaceDecision::Defer { older } = RaceArbiter::new(self.store)
            .arbitrate(scope.key, scope.usage_id)
            .await?
        {
            return Ok(Settled::RaceLost { older });
        }

        dedup.record(scope.key, &scope.log.fingerprint).await?;
        let mut pairs = check.known;
        pairs.push(scope.log.fingerprint.clone());
        accrued.pairs = Some(pairs);

        let repo = &scope.event.repo;
        let branch = &scope.event.head_branch;
        match self.host.cancel_workflow_runs(repo, branch).await {
            Ok(cancelled) => info!(cancelled, branch = %branch, "Cancelled workflow runs"),
            Err(e) => warn!(branch = %branch, "Failed to cancel workflow runs: {e}"),
        }

        let brief = self.gather_brief(scope).await?;
        progress
            .push(format!(
                "Gathered context for `{}` from {} changed file(s).",
                scope.run.check_run.name,
                brief.changed_files.len()
            ))
            .await;

        let target = LoopTarget {
            ctx: ToolContext {
                repo: repo.clone(),
                branch: branch.clone(),
                pr_number: scope.pull_request.number,
            },
            key: scope.key,
            usage_id: scope.usage_id,
        };
        let remediation = RemediationLoop::new(
            self.host,
            self.agent,
            self.store,
            budget,
            self.settings.loop_settings,
        );
        remediation
            .run(&target, &brief, progress, &mut accrued.tokens)
            .await
            .map(Settled::Finished)
    }

    async fn gather_brief(&self, scope: &AttemptScope<'_>) -> Result<RemediationBrief> {
        let repo = &scope.event.repo;
        let pr_number = scope.pull_request.number;
        let details = self.host.get_pull_request(repo, pr_number).await?;
        let changed_files = self.host.get_pull_request_files(repo, pr_number).await?;
        let workflow_definition = self
            .host
            .get_workflow_definition(repo, &scope.run.source)
            .await?;
        let file_tree = self
            .host
            .get_file_tree(repo, &scope.event.head_branch)
            .await?;

        Ok(RemediationBrief {
            check_run_name: scope.run.check_run.name.clone(),
            pull_request_title: details.title,
            pull_request_body: details.body,
            changed_files,
            workflow_definition,
            file_tree,
            error_log: scope.log.cleaned.clone(),
            rules: scope.settings.rules.clone(),
        })
    }

    /// Finalizes the usage row exactly once, then renders the terminal
    /// comment and notification.
    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        ledger: &UsageLedger<'_, P>,
        open: OpenUsage,
        scope: &AttemptScope<'_>,
        settled: Result<Settled>,
        accrued: Accrued,
        progress: &mut ProgressComment<'_, H>,
        thread: Option<&ThreadId>,
    ) -> PipelineOutcome {
        let usage_id = scope.usage_id;
        let check_run_name = &scope.run.check_run.name;
        let pr_number = scope.pull_request.number;
        let with_logs = |completion: UsageCompletion| UsageCompletion {
            original_error_log: Some(scope.log.raw.clone()),
            minimized_error_log: Some(scope.log.cleaned.clone()),
            ..completion
        };

        let (completion, body, outcome) = match settled {
            Ok(Settled::Duplicate { known }) => (
                with_logs(UsageCompletion {
                    retry_workflow_id_hash_pairs: Some(known),
                    ..UsageCompletion::default()
                }),
                already_attempted(check_run_name, &scope.log.fingerprint),
                PipelineOutcome::Duplicate {
                    usage_id,
                    fingerprint: scope.log.fingerprint.clone(),
                },
            ),
            Ok(Settled::RaceLost { older }) => (
                UsageCompletion::default(),
                deferred_to_older(pr_number, older.id.value()),
                PipelineOutcome::RaceLost {
                    usage_id,
                    older: older.id,
                },
            ),
            Ok(Settled::Finished(loop_outcome)) => {
                let body = self.terminal_body(scope, &loop_outcome).await;
                (
                    with_logs(UsageCompletion {
                        tokens: accrued.tokens,
                        retry_workflow_id_hash_pairs: accrued.pairs,
                        ..UsageCompletion::default()
                    }),
                    body,
                    PipelineOutcome::Remediated {
                        usage_id,
                        stop: loop_outcome.stop,
                        committed: loop_outcome.committed,
                        tokens: accrued.tokens,
                    },
                )
            }
            Err(e) => {
                error!(usage_id = %usage_id, "Remediation attempt failed: {e}");
                (
                    with_logs(UsageCompletion {
                        tokens: accrued.tokens,
                        retry_workflow_id_hash_pairs: accrued.pairs,
                        ..UsageCompletion::default()
                    }),
                    unexpected_failure(check_run_name),
                    PipelineOutcome::Failed {
                        usage_id: Some(usage_id),
                        reason: e.to_string(),
                    },
                )
            }
        };

        let finalized = ledger.finalize(open, completion).await;
        progress.finish(&body).await;
        self.notify(&body, thread).await;

        match finalized {
            Ok(()) => outcome,
            Err(e) => {
                error!(usage_id = %usage_id, "Usage record left open: {e}");
                PipelineOutcome::Failed {
                    usage_id: Some(usage_id),
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn terminal_body(&self, scope: &AttemptScope<'_>, outcome: &LoopOutcome) -> String {
        let check_run_name = &scope.run.check_run.name;
        let pr_number = scope.pull_request.number;
        match &outcome.stop {
            StopReason::Completed | StopReason::Stagnated if outcome.committed => {
                self.retrigger_checks(scope).await;
                finished(check_run_name)
            }
            StopReason::Completed | StopReason::Stagnated => no_changes(check_run_name),
            StopReason::BudgetExhausted { elapsed } => {
                if outcome.committed {
                    self.retrigger_checks(scope).await;
                }
                budget_exhausted(*elapsed, PROCESS_NAME)
            }
            StopReason::PullRequestClosed => pull_request_closed(pr_number),
            StopReason::BranchDeleted => branch_deleted(&scope.event.head_branch),
            StopReason::DeferredToOlder { older } => {
                deferred_to_older(pr_number, older.id.value())
            }
        }
    }

    async fn retrigger_checks(&self, scope: &AttemptScope<'_>) {
        if let Err(e) = self
            .host
            .create_empty_commit(
                &scope.event.repo,
                &scope.event.head_branch,
                RETRIGGER_COMMIT_MESSAGE,
            )
            .await
        {
            warn!(branch = %scope.event.head_branch, "Failed to push empty commit: {e}");
        }
    }

    async fn skip_with_comment(
        &self,
        progress: &mut ProgressComment<'_, H>,
        thread: Option<&ThreadId>,
        body: &str,
        failure: GuardFailure,
    ) -> PipelineOutcome {
        info!("Skipped - {failure}");
        progress.finish(body).await;
        self.notify(body, thread).await;
        PipelineOutcome::Skipped(failure)
    }

    /// Notification failures never stop the pipeline.
    async fn notify(&self, text: &str, thread: Option<&ThreadId>) -> Option<ThreadId> {
        match self.notifier.notify(text, thread).await {
            Ok(id) => id.or_else(|| thread.cloned()),
            Err(e) => {
                warn!("Failed to send notification: {e}");
                thread.cloned()
            }
        }
    }
}

fn fail_early(context: &str, e: &crate::RemedyError) -> PipelineOutcome {
    error!("{context}: {e}");
    PipelineOutcome::Failed {
        usage_id: None,
        reason: format!("{context}: {e}"),
    }
}
