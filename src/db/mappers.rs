use super::rows::{SettingsRow, UsageRow};
use crate::error::{RemedyError, Result};
use crate::{PullKey, RepositorySettings, TokenUsage, Trigger, UsageId, UsageRecord};

/// Identifiers from the code host are `u64`; PostgreSQL stores `BIGINT`.
pub fn to_db_id(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| RemedyError::DatabaseError(format!("{column} {value} exceeds BIGINT range")))
}

pub const fn from_db_count(value: i64) -> u64 {
    if value < 0 {
        0
    } else {
        value.unsigned_abs()
    }
}

pub fn parse_usage_row(row: UsageRow) -> Result<UsageRecord> {
    let trigger = Trigger::try_from(row.trigger.as_str()).map_err(RemedyError::DatabaseError)?;

    Ok(UsageRecord {
        id: UsageId::new(row.id),
        key: PullKey::new(
            from_db_count(row.owner_id),
            from_db_count(row.repo_id),
            from_db_count(row.pr_number),
        ),
        trigger,
        created_at: row.created_at,
        is_completed: row.is_completed,
        tokens: TokenUsage::new(from_db_count(row.token_input), from_db_count(row.token_output)),
        total_seconds: from_db_count(row.total_seconds),
        original_error_log: row.original_error_log,
        minimized_error_log: row.minimized_error_log,
        retry_workflow_id_hash_pairs: row.retry_workflow_id_hash_pairs,
    })
}

pub fn parse_settings_row(row: SettingsRow) -> RepositorySettings {
    RepositorySettings {
        repo_id: from_db_count(row.repo_id),
        trigger_on_test_failure: row.trigger_on_test_failure,
        rules: row.rules,
    }
}
