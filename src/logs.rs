//! Error-log cleaning ahead of fingerprinting and prompting.

use itertools::Itertools;
use regex::Regex;
use std::sync::OnceLock;

fn ansi_escape() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap_or_else(|_| unreachable!("static regex"))
    })
}

fn runner_timestamp() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?Z\s?")
            .unwrap_or_else(|_| unreachable!("static regex"))
    })
}

fn eslint_file_header() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^/[^:]*\.(ts|tsx|js|jsx)$").unwrap_or_else(|_| unreachable!("static regex"))
    })
}

fn eslint_entry() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s+\d+:\d+\s+(error|warning)")
            .unwrap_or_else(|_| unreachable!("static regex"))
    })
}

/// Produces the minimized log used for fingerprints and the agent prompt.
///
/// Strips ANSI escapes and runner timestamps, keeps only `error` entries of
/// ESLint file blocks, collapses consecutive duplicate lines and blank runs.
#[must_use]
pub fn clean_logs(raw: &str) -> String {
    let stripped = raw
        .lines()
        .map(|line| ansi_escape().replace_all(line, ""))
        .map(|line| runner_timestamp().replace(&line, "").trim_end().to_string())
        .collect::<Vec<_>>();

    drop_eslint_warnings(&stripped)
        .into_iter()
        .dedup()
        .join("\n")
        .trim()
        .to_string()
}

/// ESLint prints a file path then indented `line:col severity message`
/// entries; files left with no `error` entry are dropped entirely.
fn drop_eslint_warnings(lines: &[String]) -> Vec<String> {
    let mut kept = Vec::with_capacity(lines.len());
    let mut index = 0;

    while index < lines.len() {
        let line = &lines[index];
        if !eslint_file_header().is_match(line) {
            kept.push(line.clone());
            index += 1;
            continue;
        }

        let block_end = lines[index + 1..]
            .iter()
            .position(|next| !eslint_entry().is_match(next))
            .map_or(lines.len(), |offset| index + 1 + offset);

        let errors = lines[index + 1..block_end]
            .iter()
            .filter(|entry| entry.contains(" error "))
            .cloned()
            .collect::<Vec<_>>();

        if !errors.is_empty() {
            kept.push(line.clone());
            kept.extend(errors);
        }
        index = block_end;
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::clean_logs;

    #[test]
    fn strips_ansi_and_timestamps() {
        let raw = "2024-10-17T08:12:01.1234567Z \u{1b}[31mFAIL\u{1b}[0m src/app.test.ts\n2024-10-17T08:12:01Z   expected 2";
        assert_eq!(clean_logs(raw), "FAIL src/app.test.ts\n  expected 2");
    }

    #[test]
    fn collapses_duplicates_and_blank_runs() {
        let raw = "warn retry\nwarn retry\nwarn retry\n\n\n\nError: boom\n";
        assert_eq!(clean_logs(raw), "warn retry\n\nError: boom");
    }

    #[test]
    fn keeps_only_eslint_errors() {
        let raw = "/repo/src/a.ts\n  1:1  warning  Unexpected any  no-explicit-any\n  2:5  error  'x' is not defined  no-undef\n/repo/src/b.ts\n  3:3  warning  Missing return type\n✖ 3 problems";
        assert_eq!(
            clean_logs(raw),
            "/repo/src/a.ts\n  2:5  error  'x' is not defined  no-undef\n✖ 3 problems"
        );
    }

    #[test]
    fn identical_input_cleans_identically() {
        let raw = "\u{1b}[1mline\u{1b}[0m\nline\nother";
        assert_eq!(clean_logs(raw), clean_logs(raw));
        assert_eq!(clean_logs(raw), "line\nother");
    }
}
