#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use remedy::remediation::LoopSettings;
use remedy::{PipelineSettings, RemedyError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = ".remedy/config.toml";
const DEFAULT_EFS_ROOT: &str = "/tmp/remedy/repos";
const DEFAULT_INSTALLER_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: Option<String>,
    pub pipeline: PipelineSettings,
    /// Root of the prepared repository directories.
    pub efs_root: PathBuf,
    pub installer_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            pipeline: PipelineSettings::default(),
            efs_root: PathBuf::from(DEFAULT_EFS_ROOT),
            installer_timeout: DEFAULT_INSTALLER_TIMEOUT,
        }
    }
}

pub async fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), Path::to_path_buf);
    if !config_path.exists() {
        return Ok(Config::default());
    }

    let content = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|e| RemedyError::ConfigError(format!("Failed to read config: {e}")))?;

    parse_config_content(&content)
}

pub fn parse_config_content(content: &str) -> Result<Config> {
    let mut config = Config::default();
    let mut loop_settings = LoopSettings::default();
    let mut budget_secs = config.pipeline.execution_budget.as_secs();
    let mut buffer_secs = loop_settings.budget_buffer.as_secs();
    let mut installer_secs = config.installer_timeout.as_secs();

    for line in content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
    {
        if let Some(value) = parse_key_value(line, "database_url") {
            config.database_url = Some(expand_env_vars(value));
        }
        if let Some(value) = parse_key_value(line, "branch_prefix") {
            config.pipeline.branch_prefix = expand_env_vars(value);
        }
        if let Some(value) = parse_key_value(line, "efs_root") {
            config.efs_root = PathBuf::from(expand_env_vars(value));
        }
        if let Some(value) = parse_key_value(line, "execution_budget_secs") {
            budget_secs = parse_number(value, "execution_budget_secs")?;
        }
        if let Some(value) = parse_key_value(line, "budget_buffer_secs") {
            buffer_secs = parse_number(value, "budget_buffer_secs")?;
        }
        if let Some(value) = parse_key_value(line, "installer_timeout_secs") {
            installer_secs = parse_number(value, "installer_timeout_secs")?;
        }
        if let Some(value) = parse_key_value(line, "max_stagnant_iterations") {
            loop_settings.max_stagnant_iterations = parse_number(value, "max_stagnant_iterations")?;
        }
        if let Some(value) = parse_key_value(line, "max_tool_calls_per_phase") {
            loop_settings.max_tool_calls_per_phase =
                parse_number(value, "max_tool_calls_per_phase")?;
        }
    }

    if buffer_secs >= budget_secs {
        return Err(RemedyError::ConfigError(format!(
            "budget_buffer_secs ({buffer_secs}) must be smaller than execution_budget_secs ({budget_secs})"
        )));
    }
    if loop_settings.max_tool_calls_per_phase == 0 {
        return Err(RemedyError::ConfigError(
            "max_tool_calls_per_phase must be at least 1".to_string(),
        ));
    }

    loop_settings.budget_buffer = Duration::from_secs(buffer_secs);
    config.pipeline.execution_budget = Duration::from_secs(budget_secs);
    config.pipeline.loop_settings = loop_settings;
    config.installer_timeout = Duration::from_secs(installer_secs);

    Ok(config)
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    expand_env_vars(value)
        .parse::<T>()
        .map_err(|_| {
            RemedyError::ConfigError(format!(
                "{key} must be a non-negative integer, got '{value}'"
            ))
        })
}

fn expand_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_part = &result[start + 2..start + end];
            let (var_name, default) = var_part.split_once(":-").unwrap_or((var_part, ""));
            let value = std::env::var(var_name).unwrap_or_else(|_| default.to_string());
            result.replace_range(start..=(start + end), &value);
        } else {
            break;
        }
    }
    result
}

pub fn parse_key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split_once('=')
        .and_then(|(lhs, rhs)| (lhs.trim() == key).then_some(rhs.trim().trim_matches('"')))
}

pub fn database_url_candidates_for_cli(config: &Config) -> Vec<String> {
    let mut candidates = Vec::new();

    // 1. Environment variable wins so local shell config works immediately.
    push_unique(&mut candidates, non_empty_env_var("DATABASE_URL"));

    // 2. Project config comes next.
    push_unique(
        &mut candidates,
        config.database_url.as_ref().and_then(|url| {
            let trimmed = url.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        }),
    );

    // 3. Finally, computed defaults from REMEDY_DB_* values.
    push_unique(&mut candidates, Some(computed_default_database_url()));

    candidates
}

fn push_unique(target: &mut Vec<String>, value: Option<String>) {
    if let Some(candidate) = value {
        if !target.iter().any(|existing| existing == &candidate) {
            target.push(candidate);
        }
    }
}

fn non_empty_env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn computed_default_database_url() -> String {
    let user = std::env::var("REMEDY_DB_USER").unwrap_or_else(|_| "remedy".to_string());
    let pass = std::env::var("REMEDY_DB_PASSWORD").unwrap_or_else(|_| "remedy".to_string());
    let host = std::env::var("REMEDY_DB_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("REMEDY_DB_PORT").unwrap_or_else(|_| "5432".to_string());
    let db = std::env::var("REMEDY_DB_NAME").unwrap_or_else(|_| "remedy".to_string());
    format!("postgres://{user}:{pass}@{host}:{port}/{db}")
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::{
        database_url_candidates_for_cli, load_config, parse_config_content, parse_key_value,
    };
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn parse_reads_every_key() {
        let content = r#"database_url = "postgresql://x"
# comment
branch_prefix = "bot/"
execution_budget_secs = 600
budget_buffer_secs = "30"
max_stagnant_iterations = 5
max_tool_calls_per_phase = 2
installer_timeout_secs = 45
efs_root = "/mnt/efs""#;
        let config = parse_config_content(content).unwrap();
        assert_eq!(config.database_url, Some("postgresql://x".to_string()));
        assert_eq!(config.pipeline.branch_prefix, "bot/");
        assert_eq!(config.pipeline.execution_budget, Duration::from_secs(600));
        assert_eq!(config.pipeline.loop_settings.budget_buffer, Duration::from_secs(30));
        assert_eq!(config.pipeline.loop_settings.max_stagnant_iterations, 5);
        assert_eq!(config.pipeline.loop_settings.max_tool_calls_per_phase, 2);
        assert_eq!(config.installer_timeout, Duration::from_secs(45));
        assert_eq!(config.efs_root, PathBuf::from("/mnt/efs"));
    }

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config = parse_config_content("").unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.pipeline.branch_prefix, "gitauto/");
        assert_eq!(config.pipeline.execution_budget, Duration::from_secs(900));
        assert_eq!(config.pipeline.loop_settings.budget_buffer, Duration::from_secs(60));
        assert_eq!(config.pipeline.loop_settings.max_stagnant_iterations, 3);
        assert_eq!(config.pipeline.loop_settings.max_tool_calls_per_phase, 3);
        assert_eq!(config.installer_timeout, Duration::from_secs(120));
        assert_eq!(config.efs_root, PathBuf::from("/tmp/remedy/repos"));
    }

    #[test]
    fn invalid_numbers_and_budgets_are_rejected() {
        assert!(parse_config_content("execution_budget_secs = soon").is_err());
        assert!(
            parse_config_content("execution_budget_secs = 60\nbudget_buffer_secs = 60").is_err()
        );
        assert!(parse_config_content("max_tool_calls_per_phase = 0").is_err());
    }

    #[test]
    fn env_defaults_expand_in_values() {
        let content = "branch_prefix = \"${REMEDY_TEST_UNSET_PREFIX:-fixer/}\"";
        let config = parse_config_content(content).unwrap();
        assert_eq!(config.pipeline.branch_prefix, "fixer/");
    }

    #[test]
    fn parse_key_value_handles_spaces_and_mismatch() {
        assert_eq!(
            parse_key_value("database_url = \"postgres://u:p@h/db?x=y\"", "database_url"),
            Some("postgres://u:p@h/db?x=y")
        );
        assert_eq!(parse_key_value("other = \"x\"", "database_url"), None);
    }

    #[test]
    fn config_url_is_a_candidate() {
        let config = parse_config_content("database_url = \"postgres://from-file/db\"").unwrap();
        let candidates = database_url_candidates_for_cli(&config);
        assert!(candidates.contains(&"postgres://from-file/db".to_string()));
        assert!(candidates.last().unwrap().starts_with("postgres://"));
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).await.unwrap();
        assert_eq!(config.pipeline.branch_prefix, "gitauto/");
    }
}
