//! In-memory fake ports shared by unit tests.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use crate::dedup::FailureSource;
use crate::ports::{
    AgentClient, AgentMessage, AgentReply, CodeHost, FileChange, FingerprintStore, LogFetch,
    Notifier, PortFuture, PullRequestDetails, RepositoryTools, SettingsStore, ToolCall,
    ToolContext, UsageStore,
};
use crate::remediation::{Phase, RemainingBudget};
use crate::{
    CheckRun, CommentId, NewUsage, PullKey, RemedyError, RepoRef, RepositorySettings, ThreadId,
    TokenUsage, UsageCompletion, UsageId, UsageRecord,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

pub fn repo_ref() -> RepoRef {
    RepoRef {
        owner_id: 11,
        owner_login: "acme".to_string(),
        owner_type: "Organization".to_string(),
        repo_id: 22,
        repo_name: "web".to_string(),
    }
}

#[derive(Debug, Default)]
struct StoreState {
    next_id: i64,
    ticks: i64,
    usage: BTreeMap<i64, UsageRecord>,
    fingerprints: HashMap<PullKey, Vec<String>>,
    settings: HashMap<u64, RepositorySettings>,
    finalize_calls: HashMap<i64, u32>,
}

/// Persistence fake. Timestamps advance one millisecond per insert unless the
/// clock is frozen.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    frozen: bool,
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

impl MemoryStore {
    pub fn frozen_clock() -> Self {
        Self {
            state: Arc::default(),
            frozen: true,
        }
    }

    pub fn with_settings(settings: RepositorySettings) -> Self {
        let mut state = StoreState::default();
        state.settings.insert(settings.repo_id, settings);
        Self {
            state: Arc::new(Mutex::new(state)),
            frozen: false,
        }
    }

    pub async fn record(&self, id: UsageId) -> Option<UsageRecord> {
        self.state.lock().await.usage.get(&id.value()).cloned()
    }

    pub async fn records(&self) -> Vec<UsageRecord> {
        self.state.lock().await.usage.values().cloned().collect()
    }

    pub async fn incomplete_count(&self) -> usize {
        self.state
            .lock()
            .await
            .usage
            .values()
            .filter(|record| !record.is_completed)
            .count()
    }

    pub async fn finalize_count(&self, id: UsageId) -> u32 {
        self.state
            .lock()
            .await
            .finalize_calls
            .get(&id.value())
            .copied()
            .unwrap_or(0)
    }

    pub async fn fingerprints(&self, key: PullKey) -> Vec<String> {
        self.state
            .lock()
            .await
            .fingerprints
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn seed_fingerprint(&self, key: PullKey, fingerprint: &str) {
        self.state
            .lock()
            .await
            .fingerprints
            .entry(key)
            .or_default()
            .push(fingerprint.to_string());
    }
}

impl UsageStore for MemoryStore {
    fn insert_usage<'a>(&'a self, usage: &'a NewUsage) -> PortFuture<'a, UsageRecord> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut state = self.state.lock().await;
            state.next_id += 1;
            if !self.frozen {
                state.ticks += 1;
            }
            let record = UsageRecord {
                id: UsageId::new(state.next_id),
                key: usage.key,
                trigger: usage.trigger,
                created_at: epoch() + ChronoDuration::milliseconds(state.ticks),
                is_completed: false,
                tokens: TokenUsage::zero(),
                total_seconds: 0,
                original_error_log: None,
                minimized_error_log: None,
                retry_workflow_id_hash_pairs: Vec::new(),
            };
            state.usage.insert(record.id.value(), record.clone());
            Ok(record)
        })
    }

    fn finalize_usage<'a>(
        &'a self,
        usage_id: UsageId,
        _pr_number: u64,
        completion: &'a UsageCompletion,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            *state.finalize_calls.entry(usage_id.value()).or_insert(0) += 1;
            let record = state
                .usage
                .get_mut(&usage_id.value())
                .ok_or_else(|| RemedyError::DatabaseError(format!("no usage {usage_id}")))?;
            record.is_completed = true;
            record.tokens = completion.tokens;
            record.total_seconds = completion.total_seconds;
            record.original_error_log.clone_from(&completion.original_error_log);
            record.minimized_error_log.clone_from(&completion.minimized_error_log);
            if let Some(pairs) = &completion.retry_workflow_id_hash_pairs {
                record.retry_workflow_id_hash_pairs.clone_from(pairs);
            }
            Ok(())
        })
    }

    fn find_older_active(
        &self,
        key: PullKey,
        current: UsageId,
    ) -> PortFuture<'_, Option<UsageRecord>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let Some(current) = state.usage.get(&current.value()) else {
                return Ok(None);
            };
            let pivot = (current.created_at, current.id);
            Ok(state
                .usage
                .values()
                .filter(|r| r.key == key && !r.is_completed && (r.created_at, r.id) < pivot)
                .min_by_key(|r| (r.created_at, r.id))
                .cloned())
        })
    }
}

impl FingerprintStore for MemoryStore {
    fn get_retry_fingerprints(&self, key: PullKey) -> PortFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(self.fingerprints(key).await) })
    }

    fn append_retry_fingerprint<'a>(
        &'a self,
        key: PullKey,
        fingerprint: &'a str,
    ) -> PortFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let known = state.fingerprints.entry(key).or_default();
            if known.iter().any(|existing| existing == fingerprint) {
                return Ok(false);
            }
            known.push(fingerprint.to_string());
            Ok(true)
        })
    }
}

impl SettingsStore for MemoryStore {
    fn get_repository_settings(
        &self,
        repo_id: u64,
    ) -> PortFuture<'_, Option<RepositorySettings>> {
        Box::pin(async move { Ok(self.state.lock().await.settings.get(&repo_id).cloned()) })
    }
}

#[derive(Debug)]
struct HostState {
    next_comment: u64,
    comments: Vec<(CommentId, u64, String)>,
    check_runs: Vec<CheckRun>,
    /// Per-suite overrides of `check_runs`.
    suite_check_runs: HashMap<u64, Vec<CheckRun>>,
    log: LogFetch,
    workflow_definition: Option<String>,
    pr_open: bool,
    /// Closes the pull request after this many open-state checks.
    close_after_checks: Option<u32>,
    open_checks: u32,
    branch_exists: bool,
    cancel_calls: u32,
    empty_commits: Vec<String>,
    files: BTreeMap<String, String>,
    writes: Vec<(String, String)>,
    tool_calls: Vec<String>,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            next_comment: 0,
            comments: Vec::new(),
            check_runs: Vec::new(),
            suite_check_runs: HashMap::new(),
            log: LogFetch::Missing,
            workflow_definition: None,
            pr_open: true,
            close_after_checks: None,
            open_checks: 0,
            branch_exists: true,
            cancel_calls: 0,
            empty_commits: Vec::new(),
            files: BTreeMap::new(),
            writes: Vec::new(),
            tool_calls: Vec::new(),
        }
    }
}

/// Code host and repository tools fake.
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub async fn set_check_runs(&self, runs: Vec<CheckRun>) {
        self.state.lock().await.check_runs = runs;
    }

    pub async fn set_suite_check_runs(&self, check_suite_id: u64, runs: Vec<CheckRun>) {
        self.state
            .lock()
            .await
            .suite_check_runs
            .insert(check_suite_id, runs);
    }

    pub async fn set_log(&self, log: LogFetch) {
        self.state.lock().await.log = log;
    }

    pub async fn set_pr_open(&self, open: bool) {
        self.state.lock().await.pr_open = open;
    }

    pub async fn close_pr_after_checks(&self, checks: u32) {
        self.state.lock().await.close_after_checks = Some(checks);
    }

    pub async fn set_branch_exists(&self, exists: bool) {
        self.state.lock().await.branch_exists = exists;
    }

    pub async fn put_file(&self, path: &str, content: &str) {
        self.state
            .lock()
            .await
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub async fn seed_comment(&self, pr_number: u64, body: &str) {
        let mut state = self.state.lock().await;
        state.next_comment += 1;
        let id = CommentId::new(format!("c{}", state.next_comment));
        state.comments.push((id, pr_number, body.to_string()));
    }

    pub async fn comment_body(&self, id: &CommentId) -> Option<String> {
        self.state
            .lock()
            .await
            .comments
            .iter()
            .find(|(existing, _, _)| existing == id)
            .map(|(_, _, body)| body.clone())
    }

    pub async fn comment_bodies(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .comments
            .iter()
            .map(|(_, _, body)| body.clone())
            .collect()
    }

    pub async fn cancel_calls(&self) -> u32 {
        self.state.lock().await.cancel_calls
    }

    pub async fn empty_commits(&self) -> Vec<String> {
        self.state.lock().await.empty_commits.clone()
    }

    pub async fn writes(&self) -> Vec<(String, String)> {
        self.state.lock().await.writes.clone()
    }

    pub async fn tool_calls(&self) -> Vec<String> {
        self.state.lock().await.tool_calls.clone()
    }
}

impl CodeHost for FakeHost {
    fn get_failed_check_runs<'a>(
        &'a self,
        _repo: &'a RepoRef,
        check_suite_id: u64,
    ) -> PortFuture<'a, Vec<CheckRun>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .suite_check_runs
                .get(&check_suite_id)
                .unwrap_or(&state.check_runs)
                .clone())
        })
    }

    fn get_workflow_run_logs<'a>(
        &'a self,
        _repo: &'a RepoRef,
        _source: &'a FailureSource,
    ) -> PortFuture<'a, LogFetch> {
        Box::pin(async move { Ok(self.state.lock().await.log.clone()) })
    }

    fn get_workflow_definition<'a>(
        &'a self,
        _repo: &'a RepoRef,
        _source: &'a FailureSource,
    ) -> PortFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.state.lock().await.workflow_definition.clone()) })
    }

    fn cancel_workflow_runs<'a>(
        &'a self,
        _repo: &'a RepoRef,
        _branch: &'a str,
    ) -> PortFuture<'a, u32> {
        Box::pin(async move {
            self.state.lock().await.cancel_calls += 1;
            Ok(1)
        })
    }

    fn get_pull_request<'a>(
        &'a self,
        _repo: &'a RepoRef,
        pr_number: u64,
    ) -> PortFuture<'a, PullRequestDetails> {
        Box::pin(async move {
            Ok(PullRequestDetails {
                title: format!("Fix #{pr_number}"),
                body: None,
            })
        })
    }

    fn get_pull_request_files<'a>(
        &'a self,
        _repo: &'a RepoRef,
        _pr_number: u64,
    ) -> PortFuture<'a, Vec<FileChange>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .await
                .files
                .keys()
                .map(|filename| FileChange {
                    filename: filename.clone(),
                    status: "modified".to_string(),
                    patch: None,
                })
                .collect())
        })
    }

    fn get_file_tree<'a>(
        &'a self,
        _repo: &'a RepoRef,
        _branch: &'a str,
    ) -> PortFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(self.state.lock().await.files.keys().cloned().collect()) })
    }

    fn has_comment_with_text<'a>(
        &'a self,
        _repo: &'a RepoRef,
        pr_number: u64,
        needles: &'a [String],
    ) -> PortFuture<'a, bool> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            Ok(self
                .state
                .lock()
                .await
                .comments
                .iter()
                .filter(|(_, pr, _)| *pr == pr_number)
                .any(|(_, _, body)| needles.iter().any(|needle| body.contains(needle.as_str()))))
        })
    }

    fn create_comment<'a>(
        &'a self,
        _repo: &'a RepoRef,
        pr_number: u64,
        body: &'a str,
    ) -> PortFuture<'a, CommentId> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.next_comment += 1;
            let id = CommentId::new(format!("c{}", state.next_comment));
            state.comments.push((id.clone(), pr_number, body.to_string()));
            Ok(id)
        })
    }

    fn update_comment<'a>(
        &'a self,
        _repo: &'a RepoRef,
        comment_id: &'a CommentId,
        body: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let entry = state
                .comments
                .iter_mut()
                .find(|(existing, _, _)| existing == comment_id)
                .ok_or_else(|| RemedyError::UpstreamError(format!("no comment {comment_id}")))?;
            entry.2 = body.to_string();
            Ok(())
        })
    }

    fn branch_exists<'a>(&'a self, _repo: &'a RepoRef, _branch: &'a str) -> PortFuture<'a, bool> {
        Box::pin(async move { Ok(self.state.lock().await.branch_exists) })
    }

    fn is_pull_request_open<'a>(
        &'a self,
        _repo: &'a RepoRef,
        _pr_number: u64,
    ) -> PortFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.open_checks += 1;
            if state
                .close_after_checks
                .is_some_and(|limit| state.open_checks > limit)
            {
                state.pr_open = false;
            }
            Ok(state.pr_open)
        })
    }

    fn create_empty_commit<'a>(
        &'a self,
        _repo: &'a RepoRef,
        _branch: &'a str,
        message: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.state
                .lock()
                .await
                .empty_commits
                .push(message.to_string());
            Ok(())
        })
    }
}

impl RepositoryTools for FakeHost {
    fn get_remote_file_content<'a>(
        &'a self,
        _ctx: &'a ToolContext,
        file_path: &'a str,
        _line_number: Option<u64>,
        _keyword: Option<&'a str>,
    ) -> PortFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.tool_calls.push(format!("read:{file_path}"));
            Ok(state
                .files
                .get(file_path)
                .cloned()
                .unwrap_or_else(|| format!("File not found: {file_path}")))
        })
    }

    fn search_remote_file_contents<'a>(
        &'a self,
        _ctx: &'a ToolContext,
        query: &'a str,
    ) -> PortFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.tool_calls.push(format!("search:{query}"));
            Ok(state
                .files
                .iter()
                .filter(|(_, content)| content.contains(query))
                .map(|(path, _)| path.clone())
                .collect())
        })
    }

    fn get_file_tree_list<'a>(
        &'a self,
        _ctx: &'a ToolContext,
        dir_path: Option<&'a str>,
    ) -> PortFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state
                .tool_calls
                .push(format!("tree:{}", dir_path.unwrap_or("")));
            Ok(state
                .files
                .keys()
                .filter(|path| dir_path.map_or(true, |dir| path.starts_with(dir)))
                .cloned()
                .collect())
        })
    }

    fn apply_diff_to_file<'a>(
        &'a self,
        _ctx: &'a ToolContext,
        file_path: &'a str,
        diff: &'a str,
    ) -> PortFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.tool_calls.push(format!("diff:{file_path}"));
            state.writes.push((file_path.to_string(), diff.to_string()));
            Ok(format!("Applied diff to {file_path}"))
        })
    }

    fn replace_remote_file_content<'a>(
        &'a self,
        _ctx: &'a ToolContext,
        file_path: &'a str,
        file_content: &'a str,
    ) -> PortFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.tool_calls.push(format!("replace:{file_path}"));
            state
                .writes
                .push((file_path.to_string(), file_content.to_string()));
            state
                .files
                .insert(file_path.to_string(), file_content.to_string());
            Ok(format!("Replaced {file_path}"))
        })
    }
}

#[derive(Debug, Default)]
struct AgentState {
    explore: VecDeque<AgentReply>,
    commit: VecDeque<AgentReply>,
    /// Keep issuing fresh explore calls once the explore script is exhausted.
    explore_forever: bool,
    calls: Vec<(Phase, Vec<&'static str>)>,
    counter: u64,
}

/// Agent fake with one reply script per phase. An exhausted script answers
/// with no tool call and the idle token count.
#[derive(Debug, Clone, Default)]
pub struct FakeAgent {
    state: Arc<Mutex<AgentState>>,
    idle_tokens: TokenUsage,
    /// Every chat waits for a permit when set.
    gate: Option<Arc<Semaphore>>,
    chats: Arc<AtomicU64>,
}

pub fn tool_reply(name: &str, args: Value, tokens: TokenUsage) -> AgentReply {
    AgentReply {
        message: AgentMessage {
            role: "assistant".to_string(),
            content: Value::String(format!("calling {name}")),
        },
        tool_call: Some(ToolCall {
            id: format!("call-{name}"),
            name: name.to_string(),
            args,
        }),
        tokens,
    }
}

pub fn done_reply(tokens: TokenUsage) -> AgentReply {
    AgentReply {
        message: AgentMessage {
            role: "assistant".to_string(),
            content: Value::String("done".to_string()),
        },
        tool_call: None,
        tokens,
    }
}

impl FakeAgent {
    pub fn scripted(explore: Vec<AgentReply>, commit: Vec<AgentReply>) -> Self {
        Self {
            state: Arc::new(Mutex::new(AgentState {
                explore: explore.into(),
                commit: commit.into(),
                ..AgentState::default()
            })),
            ..Self::default()
        }
    }

    /// Holds every chat until the returned semaphore gets permits.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Budget whose elapsed time grows by `per_chat` with every chat.
    pub fn paced_budget(&self, per_chat: Duration) -> AgentPacedBudget {
        AgentPacedBudget {
            chats: Arc::clone(&self.chats),
            per_chat,
            limit: Duration::from_secs(900),
        }
    }

    pub fn with_idle_tokens(mut self, tokens: TokenUsage) -> Self {
        self.idle_tokens = tokens;
        self
    }

    /// Explore emits a fresh `search_remote_file_contents` call on every turn.
    pub fn endless_explorer() -> Self {
        Self {
            state: Arc::new(Mutex::new(AgentState {
                explore_forever: true,
                ..AgentState::default()
            })),
            ..Self::default()
        }
    }

    pub async fn calls(&self) -> Vec<(Phase, Vec<&'static str>)> {
        self.state.lock().await.calls.clone()
    }
}

impl AgentClient for FakeAgent {
    fn chat<'a>(
        &'a self,
        phase: Phase,
        tools: &'a [&'static str],
        _messages: &'a [AgentMessage],
    ) -> PortFuture<'a, AgentReply> {
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            self.chats.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.lock().await;
            state.calls.push((phase, tools.to_vec()));
            let scripted = match phase {
                Phase::Explore => state.explore.pop_front(),
                Phase::Commit => state.commit.pop_front(),
            };
            if let Some(reply) = scripted {
                return Ok(reply);
            }
            if phase == Phase::Explore {
                if state.explore_forever {
                    state.counter += 1;
                    let query = format!("needle-{}", state.counter);
                    return Ok(tool_reply(
                        "search_remote_file_contents",
                        serde_json::json!({ "query": query }),
                        TokenUsage::new(1, 1),
                    ));
                }
            }
            Ok(done_reply(self.idle_tokens))
        })
    }
}

#[derive(Debug, Default)]
struct NotifierState {
    sent: Vec<(String, Option<ThreadId>)>,
    next: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FakeNotifier {
    state: Arc<Mutex<NotifierState>>,
    failing: bool,
}

impl FakeNotifier {
    pub fn failing() -> Self {
        Self {
            state: Arc::default(),
            failing: true,
        }
    }

    pub async fn sent(&self) -> Vec<(String, Option<ThreadId>)> {
        self.state.lock().await.sent.clone()
    }
}

impl Notifier for FakeNotifier {
    fn notify<'a>(
        &'a self,
        text: &'a str,
        thread: Option<&'a ThreadId>,
    ) -> PortFuture<'a, Option<ThreadId>> {
        Box::pin(async move {
            if self.failing {
                return Err(RemedyError::UpstreamError("notifier offline".to_string()));
            }
            let mut state = self.state.lock().await;
            state.sent.push((text.to_string(), thread.cloned()));
            if thread.is_some() {
                return Ok(None);
            }
            state.next += 1;
            Ok(Some(ThreadId::new(format!("t{}", state.next))))
        })
    }
}

/// Budget with a fixed elapsed time.
#[derive(Debug, Clone, Copy)]
pub struct FixedBudget {
    pub elapsed: Duration,
    pub limit: Duration,
}

impl FixedBudget {
    pub const fn fresh() -> Self {
        Self {
            elapsed: Duration::ZERO,
            limit: Duration::from_secs(900),
        }
    }

    pub const fn at_secs(elapsed: u64) -> Self {
        Self {
            elapsed: Duration::from_secs(elapsed),
            limit: Duration::from_secs(900),
        }
    }
}

impl RemainingBudget for FixedBudget {
    fn elapsed(&self) -> Duration {
        self.elapsed
    }

    fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed)
    }
}

/// Elapsed time advances a fixed step per agent round trip.
#[derive(Debug, Clone)]
pub struct AgentPacedBudget {
    chats: Arc<AtomicU64>,
    per_chat: Duration,
    limit: Duration,
}

impl RemainingBudget for AgentPacedBudget {
    fn elapsed(&self) -> Duration {
        let chats = u32::try_from(self.chats.load(Ordering::SeqCst)).unwrap();
        self.per_chat * chats
    }

    fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }
}
