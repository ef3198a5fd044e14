use super::mappers::{parse_settings_row, to_db_id};
use super::rows::SettingsRow;
use crate::db::RemedyDb;
use crate::error::{RemedyError, Result};
use crate::ports::{PortFuture, SettingsStore};
use crate::RepositorySettings;

impl RemedyDb {
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_repository_settings_for(
        &self,
        repo_id: u64,
    ) -> Result<Option<RepositorySettings>> {
        sqlx::query_as::<_, SettingsRow>(
            "SELECT repo_id, trigger_on_test_failure, rules FROM repositories WHERE repo_id = $1",
        )
        .bind(to_db_id(repo_id, "repo_id")?)
        .fetch_optional(self.pool())
        .await
        .map(|row| row.map(parse_settings_row))
        .map_err(|e| RemedyError::DatabaseError(format!("Failed to read repository settings: {e}")))
    }

    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert_repository_settings(
        &self,
        owner_id: u64,
        settings: &RepositorySettings,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO repositories (repo_id, owner_id, trigger_on_test_failure, rules)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (repo_id) DO UPDATE
             SET owner_id = EXCLUDED.owner_id,
                 trigger_on_test_failure = EXCLUDED.trigger_on_test_failure,
                 rules = EXCLUDED.rules",
        )
        .bind(to_db_id(settings.repo_id, "repo_id")?)
        .bind(to_db_id(owner_id, "owner_id")?)
        .bind(settings.trigger_on_test_failure)
        .bind(settings.rules.as_deref())
        .execute(self.pool())
        .await
        .map(|_result| ())
        .map_err(|e| {
            RemedyError::DatabaseError(format!("Failed to upsert repository settings: {e}"))
        })
    }
}

impl SettingsStore for RemedyDb {
    fn get_repository_settings(
        &self,
        repo_id: u64,
    ) -> PortFuture<'_, Option<RepositorySettings>> {
        Box::pin(self.get_repository_settings_for(repo_id))
    }
}
