use super::{Ecosystem, EnvironmentPreparer};
use crate::ports::PortFuture;
use crate::{RemedyError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
const STAMP_DIR: &str = ".remedy";

/// Runs each ecosystem's install command in `<root>/<repo_id>`.
///
/// The manifest copy stored after a successful install acts as a stamp: when
/// it matches the current manifest and the install directory exists, the
/// install is skipped.
pub struct CommandPreparer {
    root: PathBuf,
    timeout: Duration,
    commands: HashMap<Ecosystem, Vec<String>>,
    dir_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl CommandPreparer {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: DEFAULT_INSTALL_TIMEOUT,
            commands: HashMap::new(),
            dir_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the install command of one ecosystem.
    #[must_use]
    pub fn with_command(mut self, ecosystem: Ecosystem, argv: &[&str]) -> Self {
        self.commands
            .insert(ecosystem, argv.iter().map(ToString::to_string).collect());
        self
    }

    #[must_use]
    pub fn repo_dir(&self, repo_id: u64) -> PathBuf {
        self.root.join(repo_id.to_string())
    }

    async fn lock_for(&self, dir: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.dir_locks.lock().await;
        Arc::clone(locks.entry(dir.to_path_buf()).or_default())
    }

    fn argv(&self, ecosystem: Ecosystem) -> Vec<String> {
        self.commands.get(&ecosystem).cloned().unwrap_or_else(|| {
            ecosystem
                .command()
                .iter()
                .map(ToString::to_string)
                .collect()
        })
    }

    async fn install(&self, repo_id: u64, ecosystem: Ecosystem) -> Result<bool> {
        let dir = self.repo_dir(repo_id);
        let Some(manifest) = read_optional(&dir.join(ecosystem.manifest())).await? else {
            debug!(repo_id, %ecosystem, "No manifest, skipping install");
            return Ok(false);
        };

        if can_reuse(&dir, ecosystem, &manifest).await? {
            info!(repo_id, %ecosystem, "Reusing existing install");
            return Ok(true);
        }

        let lock = self.lock_for(&dir).await;
        let _guard = lock.lock().await;

        // Another flow may have installed while this one waited.
        if can_reuse(&dir, ecosystem, &manifest).await? {
            info!(repo_id, %ecosystem, "Reusing install finished while waiting");
            return Ok(true);
        }

        self.run_command(&dir, ecosystem).await?;
        write_stamp(&dir, ecosystem, &manifest).await?;
        Ok(true)
    }

    async fn run_command(&self, dir: &Path, ecosystem: Ecosystem) -> Result<()> {
        let argv = self.argv(ecosystem);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RemedyError::InstallerError(format!("empty {ecosystem} command")))?;

        info!(dir = %dir.display(), %ecosystem, program, "Running install command");
        let child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .envs(ecosystem.env().iter().copied())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RemedyError::InstallerError(format!("Failed to execute {program}: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RemedyError::Timeout(format!("{program} install timed out")))??;

        if output.status.success() {
            Ok(())
        } else {
            Err(RemedyError::InstallerError(format!(
                "{program} failed in {} with {}: {}",
                dir.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl EnvironmentPreparer for CommandPreparer {
    fn prepare(&self, repo_id: u64, ecosystem: Ecosystem) -> PortFuture<'_, bool> {
        Box::pin(self.install(repo_id, ecosystem))
    }
}

fn stamp_path(dir: &Path, ecosystem: Ecosystem) -> PathBuf {
    dir.join(STAMP_DIR).join(ecosystem.manifest())
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn can_reuse(dir: &Path, ecosystem: Ecosystem, manifest: &str) -> Result<bool> {
    if !tokio::fs::try_exists(dir.join(ecosystem.install_dir())).await? {
        return Ok(false);
    }
    Ok(read_optional(&stamp_path(dir, ecosystem))
        .await?
        .is_some_and(|stored| stored == manifest))
}

async fn write_stamp(dir: &Path, ecosystem: Ecosystem, manifest: &str) -> Result<()> {
    let path = stamp_path(dir, ecosystem);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, manifest).await?;
    Ok(())
}
