#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::mappers::{parse_usage_row, to_db_id};
use super::rows::{UsageRow, USAGE_COLUMNS};
use crate::db::RemedyDb;
use crate::error::{RemedyError, Result};
use crate::ports::{PortFuture, UsageStore};
use crate::{NewUsage, PullKey, UsageCompletion, UsageId, UsageRecord};

impl RemedyDb {
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_usage_record(&self, usage: &NewUsage) -> Result<UsageRecord> {
        let sql = format!(
            "INSERT INTO usage (owner_id, owner_name, repo_id, repo_name, pr_number, installation_id, trigger)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {USAGE_COLUMNS}"
        );
        sqlx::query_as::<_, UsageRow>(&sql)
            .bind(to_db_id(usage.key.owner_id, "owner_id")?)
            .bind(&usage.owner_name)
            .bind(to_db_id(usage.key.repo_id, "repo_id")?)
            .bind(&usage.repo_name)
            .bind(to_db_id(usage.key.pr_number, "pr_number")?)
            .bind(to_db_id(usage.installation_id, "installation_id")?)
            .bind(usage.trigger.as_str())
            .fetch_one(self.pool())
            .await
            .map_err(|e| RemedyError::DatabaseError(format!("Failed to create usage record: {e}")))
            .and_then(parse_usage_row)
    }

    /// Completes a record. `retry_workflow_id_hash_pairs = None` keeps the
    /// stored pairs.
    ///
    /// # Errors
    /// Returns an error if the update fails or no open record matched.
    pub async fn finalize_usage_record(
        &self,
        usage_id: UsageId,
        pr_number: u64,
        completion: &UsageCompletion,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE usage
             SET is_completed = TRUE,
                 token_input = $3,
                 token_output = $4,
                 total_seconds = $5,
                 retry_workflow_id_hash_pairs = COALESCE($6, retry_workflow_id_hash_pairs),
                 original_error_log = COALESCE($7, original_error_log),
                 minimized_error_log = COALESCE($8, minimized_error_log)
             WHERE id = $1 AND pr_number = $2",
        )
        .bind(usage_id.value())
        .bind(to_db_id(pr_number, "pr_number")?)
        .bind(to_db_id(completion.tokens.input_tokens, "token_input")?)
        .bind(to_db_id(completion.tokens.output_tokens, "token_output")?)
        .bind(to_db_id(completion.total_seconds, "total_seconds")?)
        .bind(completion.retry_workflow_id_hash_pairs.clone())
        .bind(completion.original_error_log.as_deref())
        .bind(completion.minimized_error_log.as_deref())
        .execute(self.pool())
        .await
        .map_err(|e| RemedyError::DatabaseError(format!("Failed to finalize usage record: {e}")))?;

        if updated.rows_affected() == 0 {
            return Err(RemedyError::DatabaseError(format!(
                "Usage record {usage_id} for PR #{pr_number} not found"
            )));
        }
        Ok(())
    }

    /// Earliest open record for `key` ordered before `current` by
    /// `(created_at, id)`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_older_active_usage(
        &self,
        key: PullKey,
        current: UsageId,
    ) -> Result<Option<UsageRecord>> {
        let sql = format!(
            "SELECT {USAGE_COLUMNS}
             FROM usage u
             WHERE u.owner_id = $1 AND u.repo_id = $2 AND u.pr_number = $3
               AND NOT u.is_completed
               AND (u.created_at, u.id) < (
                   SELECT c.created_at, c.id FROM usage c WHERE c.id = $4
               )
             ORDER BY u.created_at, u.id
             LIMIT 1"
        );
        sqlx::query_as::<_, UsageRow>(&sql)
            .bind(to_db_id(key.owner_id, "owner_id")?)
            .bind(to_db_id(key.repo_id, "repo_id")?)
            .bind(to_db_id(key.pr_number, "pr_number")?)
            .bind(current.value())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| {
                RemedyError::DatabaseError(format!("Failed to find older active usage: {e}"))
            })?
            .map(parse_usage_row)
            .transpose()
    }

    /// Open records, oldest first, optionally narrowed to one pull request.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_active_usage(&self, key: Option<PullKey>) -> Result<Vec<UsageRecord>> {
        let sql = format!(
            "SELECT {USAGE_COLUMNS}
             FROM usage
             WHERE NOT is_completed
               AND ($1::BIGINT IS NULL OR owner_id = $1)
               AND ($2::BIGINT IS NULL OR repo_id = $2)
               AND ($3::BIGINT IS NULL OR pr_number = $3)
             ORDER BY created_at, id"
        );
        let (owner_id, repo_id, pr_number) = match key {
            Some(key) => (
                Some(to_db_id(key.owner_id, "owner_id")?),
                Some(to_db_id(key.repo_id, "repo_id")?),
                Some(to_db_id(key.pr_number, "pr_number")?),
            ),
            None => (None, None, None),
        };
        sqlx::query_as::<_, UsageRow>(&sql)
            .bind(owner_id)
            .bind(repo_id)
            .bind(pr_number)
            .fetch_all(self.pool())
            .await
            .map_err(|e| RemedyError::DatabaseError(format!("Failed to list active usage: {e}")))?
            .into_iter()
            .map(parse_usage_row)
            .collect()
    }
}

impl UsageStore for RemedyDb {
    fn insert_usage<'a>(&'a self, usage: &'a NewUsage) -> PortFuture<'a, UsageRecord> {
        Box::pin(self.insert_usage_record(usage))
    }

    fn finalize_usage<'a>(
        &'a self,
        usage_id: UsageId,
        pr_number: u64,
        completion: &'a UsageCompletion,
    ) -> PortFuture<'a, ()> {
        Box::pin(self.finalize_usage_record(usage_id, pr_number, completion))
    }

    fn find_older_active(
        &self,
        key: PullKey,
        current: UsageId,
    ) -> PortFuture<'_, Option<UsageRecord>> {
        Box::pin(self.find_older_active_usage(key, current))
    }
}
