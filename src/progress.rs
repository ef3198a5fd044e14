//! The single pull request comment an attempt keeps updated while it runs.

use crate::messages::progress_body;
use crate::ports::CodeHost;
use crate::{CommentId, RepoRef, Result};
use tracing::warn;

const STEP_PERCENT: u8 = 5;
const RUNNING_CEILING: u8 = 95;

pub struct ProgressComment<'a, H> {
    host: &'a H,
    repo: &'a RepoRef,
    comment_id: CommentId,
    check_suite_id: u64,
    percent: u8,
    lines: Vec<String>,
}

impl<'a, H> ProgressComment<'a, H>
where
    H: CodeHost + Sync,
{
    /// Posts the initial comment, carrying the in-progress marker.
    ///
    /// # Errors
    /// Returns the code host failure; without a comment there is no attempt.
    pub async fn create(
        host: &'a H,
        repo: &'a RepoRef,
        pr_number: u64,
        check_suite_id: u64,
        first_line: &str,
    ) -> Result<Self> {
        let lines = vec![first_line.to_string()];
        let body = progress_body(check_suite_id, 0, &lines);
        let comment_id = host.create_comment(repo, pr_number, &body).await?;
        Ok(Self {
            host,
            repo,
            comment_id,
            check_suite_id,
            percent: 0,
            lines,
        })
    }

    #[must_use]
    pub const fn comment_id(&self) -> &CommentId {
        &self.comment_id
    }

    #[must_use]
    pub const fn percent(&self) -> u8 {
        self.percent
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Appends a line and advances the bar. Update failures are logged only.
    pub async fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
        self.percent = self
            .percent
            .saturating_add(STEP_PERCENT)
            .min(RUNNING_CEILING);
        let body = progress_body(self.check_suite_id, self.percent, &self.lines);
        self.write(&body).await;
    }

    /// Replaces the comment with a terminal message that carries no marker.
    pub async fn finish(&mut self, body: &str) {
        self.percent = 100;
        self.write(body).await;
    }

    async fn write(&self, body: &str) {
        if let Err(e) = self
            .host
            .update_comment(self.repo, &self.comment_id, body)
            .await
        {
            warn!(comment_id = %self.comment_id.value(), "Failed to update progress comment: {e}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::ProgressComment;
    use crate::messages::in_progress_marker;
    use crate::test_support::{repo_ref, FakeHost};

    #[tokio::test]
    async fn progress_lines_accumulate_under_marker() {
        let host = FakeHost::default();
        let repo = repo_ref();
        let mut progress = ProgressComment::create(&host, &repo, 42, 7, "Starting")
            .await
            .unwrap();
        progress.push("Read `a.ts`.").await;
        progress.push("Committed changes to `a.ts`.").await;

        let body = host.comment_body(progress.comment_id()).await.unwrap();
        assert!(body.starts_with(&in_progress_marker(7)));
        assert!(body.contains("Starting\nRead `a.ts`.\nCommitted changes to `a.ts`."));
        assert_eq!(progress.percent(), 10);
    }

    #[tokio::test]
    async fn percent_stops_below_complete_until_finished() {
        let host = FakeHost::default();
        let repo = repo_ref();
        let mut progress = ProgressComment::create(&host, &repo, 42, 7, "Starting")
            .await
            .unwrap();
        for n in 0..30 {
            progress.push(format!("step {n}")).await;
        }
        assert_eq!(progress.percent(), 95);

        progress.finish("Done").await;
        assert_eq!(progress.percent(), 100);
        assert_eq!(host.comment_body(progress.comment_id()).await.unwrap(), "Done");
    }
}
