//! The closed set of agent tools and their dispatch onto [`RepositoryTools`].
//!
//! Tool names arriving from the agent are resolved exactly once, here. An
//! unknown name, or a name that belongs to the other phase, is a hard error.

use super::Phase;
use crate::ports::{RepositoryTools, ToolCall, ToolContext};
use crate::{RemedyError, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    GetRemoteFileContent,
    SearchRemoteFileContents,
    GetFileTreeList,
    ApplyDiffToFile,
    ReplaceRemoteFileContent,
}

pub const EXPLORE_TOOLS: [&str; 3] = [
    ToolKind::GetRemoteFileContent.name(),
    ToolKind::SearchRemoteFileContents.name(),
    ToolKind::GetFileTreeList.name(),
];

pub const COMMIT_TOOLS: [&str; 2] = [
    ToolKind::ApplyDiffToFile.name(),
    ToolKind::ReplaceRemoteFileContent.name(),
];

/// Names models keep inventing for a whole-file write.
const REPLACE_ALIASES: [&str; 3] = [
    "create_remote_file",
    "update_remote_file",
    "modify_remote_file",
];

impl ToolKind {
    pub const ALL: [Self; 5] = [
        Self::GetRemoteFileContent,
        Self::SearchRemoteFileContents,
        Self::GetFileTreeList,
        Self::ApplyDiffToFile,
        Self::ReplaceRemoteFileContent,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GetRemoteFileContent => "get_remote_file_content",
            Self::SearchRemoteFileContents => "search_remote_file_contents",
            Self::GetFileTreeList => "get_file_tree_list",
            Self::ApplyDiffToFile => "apply_diff_to_file",
            Self::ReplaceRemoteFileContent => "replace_remote_file_content",
        }
    }

    #[must_use]
    pub const fn phase(self) -> Phase {
        match self {
            Self::GetRemoteFileContent | Self::SearchRemoteFileContents | Self::GetFileTreeList => {
                Phase::Explore
            }
            Self::ApplyDiffToFile | Self::ReplaceRemoteFileContent => Phase::Commit,
        }
    }

    #[must_use]
    pub const fn names_for(phase: Phase) -> &'static [&'static str] {
        match phase {
            Phase::Explore => &EXPLORE_TOOLS,
            Phase::Commit => &COMMIT_TOOLS,
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if REPLACE_ALIASES.contains(&name) {
            return Some(Self::ReplaceRemoteFileContent);
        }
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

#[derive(Debug, Deserialize)]
struct FileContentArgs {
    file_path: String,
    #[serde(default)]
    line_number: Option<u64>,
    #[serde(default)]
    keyword: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct TreeArgs {
    #[serde(default)]
    dir_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiffArgs {
    file_path: String,
    diff: String,
}

#[derive(Debug, Deserialize)]
struct ReplaceArgs {
    file_path: String,
    file_content: String,
}

/// A resolved tool call with typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    GetRemoteFileContent {
        file_path: String,
        line_number: Option<u64>,
        keyword: Option<String>,
    },
    SearchRemoteFileContents {
        query: String,
    },
    GetFileTreeList {
        dir_path: Option<String>,
    },
    ApplyDiffToFile {
        file_path: String,
        diff: String,
    },
    ReplaceRemoteFileContent {
        file_path: String,
        file_content: String,
    },
}

/// What a tool call produced: the text handed back to the agent and the
/// line appended to the progress comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub result: String,
    pub progress: String,
}

impl ToolInvocation {
    /// Resolves `call` for `phase`.
    ///
    /// # Errors
    /// `UnknownTool` when the name resolves to no tool of `phase`;
    /// `ToolError` when the arguments do not fit the tool.
    pub fn from_call(phase: Phase, call: &ToolCall) -> Result<Self> {
        let kind = ToolKind::from_name(&call.name)
            .filter(|kind| kind.phase() == phase)
            .ok_or_else(|| unknown_tool(phase, &call.name))?;

        let kind = redirect(kind, &call.args);
        match kind {
            ToolKind::GetRemoteFileContent => {
                let args: FileContentArgs = parse_args(kind, &call.args)?;
                Ok(Self::GetRemoteFileContent {
                    file_path: args.file_path,
                    line_number: args.line_number,
                    keyword: args.keyword,
                })
            }
            ToolKind::SearchRemoteFileContents => {
                let args: SearchArgs = parse_args(kind, &call.args)?;
                Ok(Self::SearchRemoteFileContents { query: args.query })
            }
            ToolKind::GetFileTreeList => {
                let args: TreeArgs = parse_args(kind, &call.args)?;
                Ok(Self::GetFileTreeList {
                    dir_path: args.dir_path,
                })
            }
            ToolKind::ApplyDiffToFile => {
                let args: DiffArgs = parse_args(kind, &call.args)?;
                Ok(Self::ApplyDiffToFile {
                    file_path: args.file_path,
                    diff: args.diff,
                })
            }
            ToolKind::ReplaceRemoteFileContent => {
                let args: ReplaceArgs = parse_args(kind, &call.args)?;
                Ok(Self::ReplaceRemoteFileContent {
                    file_path: args.file_path,
                    file_content: args.file_content,
                })
            }
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ToolKind {
        match self {
            Self::GetRemoteFileContent { .. } => ToolKind::GetRemoteFileContent,
            Self::SearchRemoteFileContents { .. } => ToolKind::SearchRemoteFileContents,
            Self::GetFileTreeList { .. } => ToolKind::GetFileTreeList,
            Self::ApplyDiffToFile { .. } => ToolKind::ApplyDiffToFile,
            Self::ReplaceRemoteFileContent { .. } => ToolKind::ReplaceRemoteFileContent,
        }
    }

    /// Canonical arguments, used for repeated-call detection.
    #[must_use]
    pub fn args(&self) -> Value {
        match self {
            Self::GetRemoteFileContent {
                file_path,
                line_number,
                keyword,
            } => serde_json::json!({
                "file_path": file_path,
                "line_number": line_number,
                "keyword": keyword,
            }),
            Self::SearchRemoteFileContents { query } => serde_json::json!({ "query": query }),
            Self::GetFileTreeList { dir_path } => serde_json::json!({ "dir_path": dir_path }),
            Self::ApplyDiffToFile { file_path, diff } => {
                serde_json::json!({ "file_path": file_path, "diff": diff })
            }
            Self::ReplaceRemoteFileContent {
                file_path,
                file_content,
            } => serde_json::json!({ "file_path": file_path, "file_content": file_content }),
        }
    }

    /// # Errors
    /// Returns the collaborator's failure unchanged.
    pub async fn execute<T>(&self, tools: &T, ctx: &ToolContext) -> Result<ToolOutput>
    where
        T: RepositoryTools + Sync,
    {
        match self {
            Self::GetRemoteFileContent {
                file_path,
                line_number,
                keyword,
            } => {
                let result = tools
                    .get_remote_file_content(ctx, file_path, *line_number, keyword.as_deref())
                    .await?;
                let progress = match (line_number, keyword) {
                    (Some(line), _) => format!("Read `{file_path}` around line {line}."),
                    (None, Some(keyword)) => {
                        format!("Read `{file_path}` around keyword `{keyword}`.")
                    }
                    (None, None) => format!("Read `{file_path}`."),
                };
                Ok(ToolOutput { result, progress })
            }
            Self::SearchRemoteFileContents { query } => {
                let files = tools.search_remote_file_contents(ctx, query).await?;
                let progress = format!(
                    "Searched repository for `{query}` and found {} file(s).",
                    files.len()
                );
                let result = if files.is_empty() {
                    format!("No files found for query `{query}`.")
                } else {
                    format!(
                        "{} file(s) found for query `{query}`:\n{}",
                        files.len(),
                        bullet_list(&files)
                    )
                };
                Ok(ToolOutput { result, progress })
            }
            Self::GetFileTreeList { dir_path } => {
                let entries = tools.get_file_tree_list(ctx, dir_path.as_deref()).await?;
                let dir = dir_path.as_deref().unwrap_or("/");
                Ok(ToolOutput {
                    result: entries.join("\n"),
                    progress: format!("Listed files in `{dir}`."),
                })
            }
            Self::ApplyDiffToFile { file_path, diff } => {
                let result = tools.apply_diff_to_file(ctx, file_path, diff).await?;
                Ok(ToolOutput {
                    result,
                    progress: format!("Committed changes to `{file_path}`."),
                })
            }
            Self::ReplaceRemoteFileContent {
                file_path,
                file_content,
            } => {
                let result = tools
                    .replace_remote_file_content(ctx, file_path, file_content)
                    .await?;
                Ok(ToolOutput {
                    result,
                    progress: format!("Replaced content of `{file_path}`."),
                })
            }
        }
    }
}

/// Sends a whole-file write to the replace tool and a diff to the diff tool,
/// whichever name the agent used.
fn redirect(kind: ToolKind, args: &Value) -> ToolKind {
    let has = |field: &str| args.get(field).is_some_and(|v| !v.is_null());
    match kind {
        ToolKind::ApplyDiffToFile if has("file_content") && !has("diff") => {
            ToolKind::ReplaceRemoteFileContent
        }
        ToolKind::ReplaceRemoteFileContent if has("diff") && !has("file_content") => {
            ToolKind::ApplyDiffToFile
        }
        other => other,
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(kind: ToolKind, args: &Value) -> Result<T> {
    serde_json::from_value(args.clone())
        .map_err(|e| RemedyError::ToolError(format!("Invalid arguments for {}: {e}", kind.name())))
}

fn unknown_tool(phase: Phase, name: &str) -> RemedyError {
    let suggestion = ToolKind::names_for(phase)
        .iter()
        .map(|candidate| (strsim::jaro_winkler(name, candidate), *candidate))
        .filter(|(score, _)| *score >= 0.8)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, candidate)| candidate.to_string());

    RemedyError::UnknownTool {
        name: name.to_string(),
        phase: phase.as_str(),
        suggestion,
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}
