//! Collaborator seams of the remediation pipeline.
//!
//! Everything the pipeline does outside its own process goes through one of
//! these traits: the code host (GitHub), the agent, persistence, and the
//! notification channel. Production wires real clients; tests wire fakes.

use crate::dedup::FailureSource;
use crate::remediation::Phase;
use crate::{
    CheckRun, CommentId, PullKey, RepoRef, RepositorySettings, Result, ThreadId, TokenUsage,
    UsageCompletion, UsageId, UsageRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Result of fetching a failed run's log. `PermissionDenied` is the 404 the
/// code host returns when the installation lacks the `actions` permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFetch {
    Found(String),
    PermissionDenied,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestDetails {
    pub title: String,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    pub status: String,
    pub patch: Option<String>,
}

/// Repository and branch a tool call operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub repo: RepoRef,
    pub branch: String,
    pub pr_number: u64,
}

pub trait CodeHost {
    fn get_failed_check_runs<'a>(
        &'a self,
        repo: &'a RepoRef,
        check_suite_id: u64,
    ) -> PortFuture<'a, Vec<CheckRun>>;

    fn get_workflow_run_logs<'a>(
        &'a self,
        repo: &'a RepoRef,
        source: &'a FailureSource,
    ) -> PortFuture<'a, LogFetch>;

    fn get_workflow_definition<'a>(
        &'a self,
        repo: &'a RepoRef,
        source: &'a FailureSource,
    ) -> PortFuture<'a, Option<String>>;

    /// Cancels queued and in-progress workflow runs on `branch`; returns how many.
    fn cancel_workflow_runs<'a>(&'a self, repo: &'a RepoRef, branch: &'a str)
        -> PortFuture<'a, u32>;

    fn get_pull_request<'a>(
        &'a self,
        repo: &'a RepoRef,
        pr_number: u64,
    ) -> PortFuture<'a, PullRequestDetails>;

    fn get_pull_request_files<'a>(
        &'a self,
        repo: &'a RepoRef,
        pr_number: u64,
    ) -> PortFuture<'a, Vec<FileChange>>;

    fn get_file_tree<'a>(&'a self, repo: &'a RepoRef, branch: &'a str)
        -> PortFuture<'a, Vec<String>>;

    fn has_comment_with_text<'a>(
        &'a self,
        repo: &'a RepoRef,
        pr_number: u64,
        needles: &'a [String],
    ) -> PortFuture<'a, bool>;

    fn create_comment<'a>(
        &'a self,
        repo: &'a RepoRef,
        pr_number: u64,
        body: &'a str,
    ) -> PortFuture<'a, CommentId>;

    fn update_comment<'a>(
        &'a self,
        repo: &'a RepoRef,
        comment_id: &'a CommentId,
        body: &'a str,
    ) -> PortFuture<'a, ()>;

    fn branch_exists<'a>(&'a self, repo: &'a RepoRef, branch: &'a str) -> PortFuture<'a, bool>;

    fn is_pull_request_open<'a>(&'a self, repo: &'a RepoRef, pr_number: u64)
        -> PortFuture<'a, bool>;

    fn create_empty_commit<'a>(
        &'a self,
        repo: &'a RepoRef,
        branch: &'a str,
        message: &'a str,
    ) -> PortFuture<'a, ()>;
}

/// Repository operations the agent may request through tool calls.
pub trait RepositoryTools {
    fn get_remote_file_content<'a>(
        &'a self,
        ctx: &'a ToolContext,
        file_path: &'a str,
        line_number: Option<u64>,
        keyword: Option<&'a str>,
    ) -> PortFuture<'a, String>;

    fn search_remote_file_contents<'a>(
        &'a self,
        ctx: &'a ToolContext,
        query: &'a str,
    ) -> PortFuture<'a, Vec<String>>;

    fn get_file_tree_list<'a>(
        &'a self,
        ctx: &'a ToolContext,
        dir_path: Option<&'a str>,
    ) -> PortFuture<'a, Vec<String>>;

    fn apply_diff_to_file<'a>(
        &'a self,
        ctx: &'a ToolContext,
        file_path: &'a str,
        diff: &'a str,
    ) -> PortFuture<'a, String>;

    fn replace_remote_file_content<'a>(
        &'a self,
        ctx: &'a ToolContext,
        file_path: &'a str,
        file_content: &'a str,
    ) -> PortFuture<'a, String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: String,
    pub content: Value,
}

impl AgentMessage {
    #[must_use]
    pub fn user(content: impl Into<Value>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn tool_result(tool_call_id: &str, result: &str) -> Self {
        Self::user(serde_json::json!([{
            "type": "tool_result",
            "tool_use_id": tool_call_id,
            "content": result,
        }]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// One tool-calling completion. `tool_call == None` means the agent is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub message: AgentMessage,
    pub tool_call: Option<ToolCall>,
    pub tokens: TokenUsage,
}

pub trait AgentClient {
    fn chat<'a>(
        &'a self,
        phase: Phase,
        tools: &'a [&'static str],
        messages: &'a [AgentMessage],
    ) -> PortFuture<'a, AgentReply>;
}

pub trait UsageStore {
    fn insert_usage<'a>(&'a self, usage: &'a crate::NewUsage) -> PortFuture<'a, UsageRecord>;

    fn finalize_usage<'a>(
        &'a self,
        usage_id: UsageId,
        pr_number: u64,
        completion: &'a UsageCompletion,
    ) -> PortFuture<'a, ()>;

    /// Earliest not-yet-completed record for `key` created before `current`.
    fn find_older_active(
        &self,
        key: PullKey,
        current: UsageId,
    ) -> PortFuture<'_, Option<UsageRecord>>;
}

pub trait FingerprintStore {
    fn get_retry_fingerprints(&self, key: PullKey) -> PortFuture<'_, Vec<String>>;

    /// Idempotent append; returns `true` when this call stored the fingerprint.
    fn append_retry_fingerprint<'a>(
        &'a self,
        key: PullKey,
        fingerprint: &'a str,
    ) -> PortFuture<'a, bool>;
}

pub trait SettingsStore {
    fn get_repository_settings(&self, repo_id: u64)
        -> PortFuture<'_, Option<RepositorySettings>>;
}

pub trait Notifier {
    fn notify<'a>(
        &'a self,
        text: &'a str,
        thread: Option<&'a ThreadId>,
    ) -> PortFuture<'a, Option<ThreadId>>;
}

pub trait PersistencePorts: UsageStore + FingerprintStore + SettingsStore {}

impl<T> PersistencePorts for T where T: UsageStore + FingerprintStore + SettingsStore {}

pub trait CodeHostPorts: CodeHost + RepositoryTools {}

impl<T> CodeHostPorts for T where T: CodeHost + RepositoryTools {}
