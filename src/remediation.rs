//! Bounded explore/commit loop against the agent.
//!
//! Each iteration runs one explore phase (read-only tools) and one commit
//! phase (file writes). Before an iteration starts the loop re-validates the
//! world: budget, pull request state, branch existence, and whether an older
//! attempt has appeared for the same pull request.

pub mod budget;
pub mod tools;


pub use budget::{check_budget, BudgetCheck, RemainingBudget, WallClockBudget};
pub use tools::{ToolInvocation, ToolKind, ToolOutput};

use crate::ports::{AgentClient, AgentMessage, CodeHostPorts, FileChange, ToolContext, UsageStore};
use crate::progress::ProgressComment;
use crate::race::{RaceArbiter, RaceDecision};
use crate::{PullKey, RemedyError, Result, TokenUsage, UsageId, UsageRecord};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Explore,
    Commit,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Commit => "commit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_stagnant_iterations: u32,
    pub max_tool_calls_per_phase: u32,
    pub budget_buffer: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_stagnant_iterations: 3,
            max_tool_calls_per_phase: 3,
            budget_buffer: Duration::from_secs(60),
        }
    }
}

/// Context handed to the agent in the first message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationBrief {
    pub check_run_name: String,
    pub pull_request_title: String,
    pub pull_request_body: Option<String>,
    pub changed_files: Vec<FileChange>,
    pub workflow_definition: Option<String>,
    pub file_tree: Vec<String>,
    pub error_log: String,
    pub rules: Option<String>,
}

impl RemediationBrief {
    /// # Errors
    /// Returns a serialization failure.
    pub fn to_message(&self) -> Result<AgentMessage> {
        Ok(AgentMessage::user(serde_json::to_string(self)?))
    }
}

/// What the loop operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopTarget {
    pub ctx: ToolContext,
    pub key: PullKey,
    pub usage_id: UsageId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Neither phase had anything left to do.
    Completed,
    Stagnated,
    BudgetExhausted { elapsed: Duration },
    PullRequestClosed,
    BranchDeleted,
    DeferredToOlder { older: UsageRecord },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub tool_name: Option<&'static str>,
    pub tool_args: Option<Value>,
    pub tokens: TokenUsage,
    pub executed: u32,
    pub has_more: bool,
}

impl PhaseOutcome {
    const fn idle(phase: Phase) -> Self {
        Self {
            phase,
            tool_name: None,
            tool_args: None,
            tokens: TokenUsage::zero(),
            executed: 0,
            has_more: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub stop: StopReason,
    pub committed: bool,
    pub iterations: u32,
}

/// Conversation state carried across phases.
struct Conversation {
    messages: Vec<AgentMessage>,
    history: Vec<ToolInvocation>,
}

pub struct RemediationLoop<'a, H, A, S> {
    host: &'a H,
    agent: &'a A,
    store: &'a S,
    budget: &'a dyn RemainingBudget,
    settings: LoopSettings,
}

impl<'a, H, A, S> RemediationLoop<'a, H, A, S>
where
    H: CodeHostPorts + Sync,
    A: AgentClient + Sync,
    S: UsageStore + Sync,
{
    #[must_use]
    pub const fn new(
        host: &'a H,
        agent: &'a A,
        store: &'a S,
        budget: &'a dyn RemainingBudget,
        settings: LoopSettings,
    ) -> Self {
        Self {
            host,
            agent,
            store,
            budget,
            settings,
        }
    }

    /// Runs iterations until a stop condition.
    ///
    /// Tokens are added to `totals` as each agent reply arrives, so the
    /// caller still sees what was spent when this returns an error.
    ///
    /// # Errors
    /// Returns collaborator failures and `UnknownTool`.
    pub async fn run(
        &self,
        target: &LoopTarget,
        brief: &RemediationBrief,
        progress: &mut ProgressComment<'_, H>,
        totals: &mut TokenUsage,
    ) -> Result<LoopOutcome> {
        let mut conversation = Conversation {
            messages: vec![brief.to_message()?],
            history: Vec::new(),
        };
        let mut committed = false;
        let mut iterations = 0_u32;
        let mut stagnant = 0_u32;

        let stop = loop {
            if let Some(stop) = self.preflight(target).await? {
                break stop;
            }
            iterations += 1;

            let explore = self
                .run_phase(Phase::Explore, target, &mut conversation, progress, totals)
                .await?;
            let commit = self
                .run_phase(Phase::Commit, target, &mut conversation, progress, totals)
                .await?;
            committed |= commit.executed > 0;

            debug!(
                usage_id = %target.usage_id,
                iteration = iterations,
                explore_more = explore.has_more,
                commit_more = commit.has_more,
                explore_tool = explore.tool_name,
                commit_tool = commit.tool_name,
                "Finished remediation iteration"
            );

            match (explore.has_more, commit.has_more) {
                (false, false) => break StopReason::Completed,
                (true, true) => stagnant = 0,
                _ => {
                    stagnant += 1;
                    if stagnant > self.settings.max_stagnant_iterations {
                        break StopReason::Stagnated;
                    }
                }
            }
        };

        info!(
            usage_id = %target.usage_id,
            iterations,
            committed,
            stop = ?stop,
            "Remediation loop stopped"
        );
        Ok(LoopOutcome {
            stop,
            committed,
            iterations,
        })
    }

    async fn preflight(&self, target: &LoopTarget) -> Result<Option<StopReason>> {
        let budget = check_budget(self.budget, self.settings.budget_buffer);
        if budget.approaching {
            warn!(
                usage_id = %target.usage_id,
                elapsed_secs = budget.elapsed.as_secs_f64(),
                "Execution budget nearly exhausted"
            );
            return Ok(Some(StopReason::BudgetExhausted {
                elapsed: budget.elapsed,
            }));
        }

        let ctx = &target.ctx;
        if !self.host.is_pull_request_open(&ctx.repo, ctx.pr_number).await? {
            return Ok(Some(StopReason::PullRequestClosed));
        }
        if !self.host.branch_exists(&ctx.repo, &ctx.branch).await? {
            return Ok(Some(StopReason::BranchDeleted));
        }

        match RaceArbiter::new(self.store)
            .arbitrate(target.key, target.usage_id)
            .await?
        {
            RaceDecision::Proceed => Ok(None),
            RaceDecision::Defer { older } => Ok(Some(StopReason::DeferredToOlder { older })),
        }
    }

    async fn run_phase(
        &self,
        phase: Phase,
        target: &LoopTarget,
        conversation: &mut Conversation,
        progress: &mut ProgressComment<'_, H>,
        totals: &mut TokenUsage,
    ) -> Result<PhaseOutcome> {
        let tools = ToolKind::names_for(phase);
        let mut outcome = PhaseOutcome::idle(phase);

        for _ in 0..self.settings.max_tool_calls_per_phase {
            let reply = self
                .agent
                .chat(phase, tools, &conversation.messages)
                .await?;
            *totals += reply.tokens;
            outcome.tokens += reply.tokens;

            let Some(call) = reply.tool_call else {
                break;
            };
            if call.id.is_empty() {
                return Err(RemedyError::AgentError(format!(
                    "`{}` call in {} phase has no call id",
                    call.name,
                    phase.as_str()
                )));
            }
            conversation.messages.push(reply.message);

            let result = match ToolInvocation::from_call(phase, &call) {
                Ok(invocation) if conversation.history.contains(&invocation) => {
                    debug!(tool = invocation.kind().name(), "Skipped repeated tool call");
                    format!(
                        "Error: `{}` was already called with these arguments. Use the earlier result or try something different.",
                        invocation.kind().name()
                    )
                }
                Ok(invocation) => {
                    let output = invocation.execute(self.host, &target.ctx).await?;
                    outcome.executed += 1;
                    outcome.tool_name = Some(invocation.kind().name());
                    outcome.tool_args = Some(invocation.args());
                    progress.push(output.progress).await;
                    conversation.history.push(invocation);
                    output.result
                }
                Err(RemedyError::ToolError(message)) => {
                    debug!(tool = %call.name, "Rejected tool arguments: {message}");
                    format!("Error: {message}")
                }
                Err(e) => return Err(e),
            };
            conversation
                .messages
                .push(AgentMessage::tool_result(&call.id, &result));
        }

        outcome.has_more = outcome.executed > 0;
        Ok(outcome)
    }
}
