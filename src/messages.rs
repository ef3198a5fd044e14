//! User-facing pull request comment texts.

use std::time::Duration;

pub const STUMBLED_MESSAGE: &str =
    "Oops! Check run stumbled. Digging into the failure and working on a fix.";

pub const PERMISSION_DENIED_MESSAGE: &str =
    "Approval permission to read workflow logs is required. Please grant it here:";

/// Hidden marker carried by the progress comment while an attempt for
/// `check_suite_id` is running.
#[must_use]
pub fn in_progress_marker(check_suite_id: u64) -> String {
    format!("<!-- remedy:check-suite:{check_suite_id} -->")
}

#[must_use]
pub fn progress_body(check_suite_id: u64, percent: u8, lines: &[String]) -> String {
    let percent = percent.min(100);
    let filled = usize::from(percent / 10);
    format!(
        "{}\n`[{}{}] {percent}%`\n\n{}",
        in_progress_marker(check_suite_id),
        "=".repeat(filled),
        " ".repeat(10 - filled),
        lines.join("\n")
    )
}

#[must_use]
pub fn permission_request(owner_type: &str, owner_login: &str, installation_id: u64) -> String {
    let settings_url = if owner_type == "Organization" {
        format!(
            "https://github.com/organizations/{owner_login}/settings/installations/{installation_id}/permissions/update"
        )
    } else {
        format!("https://github.com/settings/installations/{installation_id}/permissions/update")
    };
    format!("{PERMISSION_DENIED_MESSAGE} {settings_url}")
}

#[must_use]
pub const fn log_not_found() -> &'static str {
    "I couldn't find the error log for this check run. Contact support if the issue persists."
}

#[must_use]
pub fn already_attempted(check_run_name: &str, fingerprint: &str) -> String {
    format!(
        "Skipping `{check_run_name}` because I have already tried to fix this exact error before `{fingerprint}`."
    )
}

#[must_use]
pub fn deferred_to_older(pr_number: u64, older_usage_id: i64) -> String {
    format!(
        "Process stopped: an older active attempt (#{older_usage_id}) is already fixing PR #{pr_number}. Avoiding race condition."
    )
}

#[must_use]
pub fn pull_request_closed(pr_number: u64) -> String {
    format!("Process stopped: Pull request #{pr_number} was closed during execution.")
}

#[must_use]
pub fn branch_deleted(branch: &str) -> String {
    format!("Process stopped: Branch '{branch}' has been deleted.")
}

#[must_use]
pub fn budget_exhausted(elapsed: Duration, process_name: &str) -> String {
    format!(
        "{process_name} stopped due to execution time limit ({:.1}s elapsed). Proceeding with current progress.",
        elapsed.as_secs_f64()
    )
}

#[must_use]
pub fn finished(check_run_name: &str) -> String {
    format!("Finished fixing the `{check_run_name}` check run error!")
}

#[must_use]
pub fn no_changes(check_run_name: &str) -> String {
    format!("Investigated the `{check_run_name}` check run error but found no change to commit.")
}

#[must_use]
pub fn unexpected_failure(check_run_name: &str) -> String {
    format!(
        "Something went wrong while fixing the `{check_run_name}` check run error. The attempt has been stopped."
    )
}

#[cfg(test)]
mod tests {
    use super::{budget_exhausted, in_progress_marker, permission_request, progress_body};
    use std::time::Duration;

    #[test]
    fn progress_body_always_carries_marker() {
        let body = progress_body(77, 30, &["Read `src/a.ts`.".to_string()]);
        assert!(body.starts_with(&in_progress_marker(77)));
        assert!(body.contains("`[===       ] 30%`"));
        assert!(body.ends_with("Read `src/a.ts`."));
    }

    #[test]
    fn progress_percent_is_clamped() {
        assert!(progress_body(1, 250, &[]).contains("[==========] 100%"));
    }

    #[test]
    fn permission_url_depends_on_owner_type() {
        assert!(permission_request("Organization", "acme", 9)
            .ends_with("https://github.com/organizations/acme/settings/installations/9/permissions/update"));
        assert!(permission_request("User", "alice", 9)
            .ends_with("https://github.com/settings/installations/9/permissions/update"));
    }

    #[test]
    fn budget_message_formats_one_decimal() {
        assert_eq!(
            budget_exhausted(Duration::from_millis(45_700), "Check run processing"),
            "Check run processing stopped due to execution time limit (45.7s elapsed). Proceeding with current progress."
        );
    }
}
