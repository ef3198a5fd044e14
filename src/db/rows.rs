use sqlx::FromRow;

pub(crate) const USAGE_COLUMNS: &str = "id, owner_id, repo_id, pr_number, trigger, created_at, is_completed,
     token_input, token_output, total_seconds, original_error_log, minimized_error_log,
     retry_workflow_id_hash_pairs";

#[derive(FromRow)]
pub(crate) struct UsageRow {
    pub(crate) id: i64,
    pub(crate) owner_id: i64,
    pub(crate) repo_id: i64,
    pub(crate) pr_number: i64,
    pub(crate) trigger: String,
    pub(crate) created_at: chrono::DateTime<chrono::Utc>,
    pub(crate) is_completed: bool,
    pub(crate) token_input: i64,
    pub(crate) token_output: i64,
    pub(crate) total_seconds: i64,
    pub(crate) original_error_log: Option<String>,
    pub(crate) minimized_error_log: Option<String>,
    pub(crate) retry_workflow_id_hash_pairs: Vec<String>,
}

#[derive(FromRow)]
pub(crate) struct SettingsRow {
    pub(crate) repo_id: i64,
    pub(crate) trigger_on_test_failure: bool,
    pub(crate) rules: Option<String>,
}
