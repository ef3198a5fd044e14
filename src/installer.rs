//! In-process cache of background dependency-install tasks.
//!
//! One task per (repository, ecosystem). A pending or successful task is
//! shared by every caller; a failed one is replaced on the next submit.

mod preparer;


pub use preparer::CommandPreparer;

use crate::ports::PortFuture;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ecosystem {
    Node,
    Python,
    Php,
    Ruby,
}

impl Ecosystem {
    pub const ALL: [Self; 4] = [Self::Node, Self::Python, Self::Php, Self::Ruby];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Python => "python",
            Self::Php => "php",
            Self::Ruby => "ruby",
        }
    }

    /// File whose presence and content decide whether an install is needed.
    #[must_use]
    pub const fn manifest(self) -> &'static str {
        match self {
            Self::Node => "package.json",
            Self::Python => "requirements.txt",
            Self::Php => "composer.json",
            Self::Ruby => "Gemfile",
        }
    }

    /// Directory an install leaves behind, relative to the repository root.
    #[must_use]
    pub const fn install_dir(self) -> &'static str {
        match self {
            Self::Node => "node_modules",
            Self::Python => ".pip",
            Self::Php => "vendor",
            Self::Ruby => "vendor/bundle",
        }
    }

    #[must_use]
    pub const fn command(self) -> &'static [&'static str] {
        match self {
            Self::Node => &["npm", "install"],
            Self::Python => &["pip", "install", "-r", "requirements.txt", "--target", ".pip"],
            Self::Php => &["composer", "install"],
            Self::Ruby => &["bundle", "install"],
        }
    }

    /// Extra environment for the install command.
    #[must_use]
    pub const fn env(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Node => &[("npm_config_cache", "/tmp/.npm")],
            Self::Ruby => &[("BUNDLE_PATH", "vendor/bundle")],
            Self::Python | Self::Php => &[],
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Ecosystem {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|eco| eco.as_str() == value)
            .ok_or_else(|| format!("Unknown ecosystem: {value}"))
    }
}

/// Performs one dependency install. `Ok(false)` means nothing usable was
/// prepared and counts as a failure.
pub trait EnvironmentPreparer: Send + Sync + 'static {
    fn prepare(&self, repo_id: u64, ecosystem: Ecosystem) -> PortFuture<'_, bool>;
}

type SharedTask = Shared<BoxFuture<'static, bool>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Spawned,
    InProgress,
    Reused,
    Retried,
}

/// Handle to a (possibly shared) install task.
#[derive(Clone)]
pub struct TaskHandle {
    repo_id: u64,
    ecosystem: Ecosystem,
    status: SubmitStatus,
    task: SharedTask,
}

impl TaskHandle {
    #[must_use]
    pub const fn status(&self) -> SubmitStatus {
        self.status
    }

    #[must_use]
    pub const fn ecosystem(&self) -> Ecosystem {
        self.ecosystem
    }

    #[must_use]
    pub const fn repo_id(&self) -> u64 {
        self.repo_id
    }

    /// Waits for the task; `true` only on success.
    pub async fn wait(self) -> bool {
        self.task.await
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("repo_id", &self.repo_id)
            .field("ecosystem", &self.ecosystem)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

pub struct InstallerCache<P> {
    preparer: Arc<P>,
    permits: Arc<Semaphore>,
    tasks: Mutex<HashMap<(u64, Ecosystem), SharedTask>>,
}

impl<P: EnvironmentPreparer> InstallerCache<P> {
    /// The worker pool is sized to the number of ecosystems.
    #[must_use]
    pub fn new(preparer: P) -> Self {
        Self::with_workers(preparer, Ecosystem::ALL.len())
    }

    #[must_use]
    pub fn with_workers(preparer: P, workers: usize) -> Self {
        Self {
            preparer: Arc::new(preparer),
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the current task for the key, spawning one when there is none
    /// or the previous one failed. The lookup and the insert happen under one
    /// lock, so concurrent submits for a key spawn at most one task.
    pub async fn submit(&self, repo_id: u64, ecosystem: Ecosystem) -> TaskHandle {
        let key = (repo_id, ecosystem);
        let mut tasks = self.tasks.lock().await;

        let status = match tasks.get(&key) {
            Some(existing) => match existing.clone().now_or_never() {
                None => {
                    debug!(repo_id, %ecosystem, "Install already in progress");
                    return handle(key, SubmitStatus::InProgress, existing.clone());
                }
                Some(true) => {
                    debug!(repo_id, %ecosystem, "Reusing completed install");
                    return handle(key, SubmitStatus::Reused, existing.clone());
                }
                Some(false) => {
                    info!(repo_id, %ecosystem, "Retrying failed install");
                    SubmitStatus::Retried
                }
            },
            None => SubmitStatus::Spawned,
        };

        let task = self.spawn(repo_id, ecosystem);
        tasks.insert(key, task.clone());
        handle(key, status, task)
    }

    /// `false` when no task exists, the task failed, or it is still running
    /// after `timeout`. Never raises the task's failure.
    pub async fn is_ready(&self, repo_id: u64, ecosystem: Ecosystem, timeout: Duration) -> bool {
        let task = self.tasks.lock().await.get(&(repo_id, ecosystem)).cloned();
        let Some(task) = task else {
            return false;
        };
        match tokio::time::timeout(timeout, task).await {
            Ok(ready) => ready,
            Err(_) => {
                warn!(
                    repo_id,
                    %ecosystem,
                    timeout_ms = timeout.as_millis(),
                    "Install not ready before timeout"
                );
                false
            }
        }
    }

    /// Submits every ecosystem and returns the ones ready within `timeout`.
    pub async fn ensure_ready(
        &self,
        repo_id: u64,
        ecosystems: &[Ecosystem],
        timeout: Duration,
    ) -> Vec<Ecosystem> {
        for ecosystem in ecosystems {
            let _ = self.submit(repo_id, *ecosystem).await;
        }
        let checks = ecosystems
            .iter()
            .map(|ecosystem| async move {
                (
                    *ecosystem,
                    self.is_ready(repo_id, *ecosystem, timeout).await,
                )
            });
        futures_util::future::join_all(checks)
            .await
            .into_iter()
            .filter_map(|(ecosystem, ready)| ready.then_some(ecosystem))
            .collect()
    }

    fn spawn(&self, repo_id: u64, ecosystem: Ecosystem) -> SharedTask {
        let preparer = Arc::clone(&self.preparer);
        let permits = Arc::clone(&self.permits);

        let join = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return false;
            };
            match preparer.prepare(repo_id, ecosystem).await {
                Ok(true) => {
                    info!(repo_id, %ecosystem, "Install finished");
                    true
                }
                Ok(false) => {
                    warn!(repo_id, %ecosystem, "Install produced nothing");
                    false
                }
                Err(e) => {
                    warn!(repo_id, %ecosystem, "Install failed: {e}");
                    false
                }
            }
        });

        async move {
            join.await.unwrap_or_else(|e| {
                warn!(repo_id, %ecosystem, "Install task aborted: {e}");
                false
            })
        }
        .boxed()
        .shared()
    }
}

fn handle(key: (u64, Ecosystem), status: SubmitStatus, task: SharedTask) -> TaskHandle {
    TaskHandle {
        repo_id: key.0,
        ecosystem: key.1,
        status,
        task,
    }
}
