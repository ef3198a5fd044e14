use super::mappers::to_db_id;
use crate::db::RemedyDb;
use crate::error::{RemedyError, Result};
use crate::ports::{FingerprintStore, PortFuture};
use crate::PullKey;

impl RemedyDb {
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_retry_fingerprints_for(&self, key: PullKey) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT fingerprint FROM retry_fingerprints
             WHERE owner_id = $1 AND repo_id = $2 AND pr_number = $3
             ORDER BY created_at, fingerprint",
        )
        .bind(to_db_id(key.owner_id, "owner_id")?)
        .bind(to_db_id(key.repo_id, "repo_id")?)
        .bind(to_db_id(key.pr_number, "pr_number")?)
        .fetch_all(self.pool())
        .await
        .map_err(|e| RemedyError::DatabaseError(format!("Failed to read retry fingerprints: {e}")))
    }

    /// Idempotent: a concurrent or repeated append of the same fingerprint
    /// stores one row and reports `false`.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn append_retry_fingerprint_for(
        &self,
        key: PullKey,
        fingerprint: &str,
    ) -> Result<bool> {
        sqlx::query(
            "INSERT INTO retry_fingerprints (owner_id, repo_id, pr_number, fingerprint)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT DO NOTHING",
        )
        .bind(to_db_id(key.owner_id, "owner_id")?)
        .bind(to_db_id(key.repo_id, "repo_id")?)
        .bind(to_db_id(key.pr_number, "pr_number")?)
        .bind(fingerprint)
        .execute(self.pool())
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|e| RemedyError::DatabaseError(format!("Failed to append retry fingerprint: {e}")))
    }
}

impl FingerprintStore for RemedyDb {
    fn get_retry_fingerprints(&self, key: PullKey) -> PortFuture<'_, Vec<String>> {
        Box::pin(self.get_retry_fingerprints_for(key))
    }

    fn append_retry_fingerprint<'a>(
        &'a self,
        key: PullKey,
        fingerprint: &'a str,
    ) -> PortFuture<'a, bool> {
        Box::pin(self.append_retry_fingerprint_for(key, fingerprint))
    }
}
