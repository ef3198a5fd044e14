#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use thiserror::Error;

/// Error code constants for type-safe error handling
pub mod code {
    pub const NOTFOUND: &str = "NOTFOUND";
    pub const INVALID: &str = "INVALID";
    pub const CONFLICT: &str = "CONFLICT";
    pub const DEPENDENCY: &str = "DEPENDENCY";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Error, Debug)]
pub enum RemedyError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Upstream API error: {0}")]
    UpstreamError(String),

    #[error("Agent error: {0}")]
    AgentError(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Unknown tool '{name}' in {phase} phase{}", suggestion_suffix(.suggestion))]
    UnknownTool {
        name: String,
        phase: &'static str,
        suggestion: Option<String>,
    },

    #[error("Installer error: {0}")]
    InstallerError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_deref()
        .map_or_else(String::new, |name| format!(" (did you mean '{name}'?)"))
}

impl RemedyError {
    /// Returns the protocol error code for this error
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) | Self::SerializationError(_) => code::INVALID,
            Self::DatabaseError(_) | Self::SqlxError(_) => code::INTERNAL,
            Self::UpstreamError(_) | Self::IoError(_) | Self::InstallerError(_) => {
                code::DEPENDENCY
            }
            Self::AgentError(_) | Self::ToolError(_) => code::CONFLICT,
            Self::UnknownTool { .. } => code::NOTFOUND,
            Self::Timeout(_) => code::TIMEOUT,
        }
    }

    /// Returns the exit code for this error
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigError(_) => 2,
            Self::DatabaseError(_) | Self::SqlxError(_) => 3,
            Self::UpstreamError(_) => 4,
            Self::AgentError(_) | Self::ToolError(_) | Self::UnknownTool { .. } => 5,
            Self::InstallerError(_) => 6,
            Self::IoError(_) => 7,
            Self::SerializationError(_) => 8,
            Self::Timeout(_) => 9,
        }
    }
}

/// Protocol error codes as documented in the CLI
pub const ERROR_CODES: &[(&str, &str, &str)] = &[
    (
        code::NOTFOUND,
        "Resource was not found",
        "Verify the identifier or tool name",
    ),
    (
        code::INVALID,
        "Invalid configuration or payload",
        "Check the config file and webhook payload for missing or malformed fields",
    ),
    (
        code::CONFLICT,
        "Agent produced an unusable response",
        "Inspect the usage record and retry the check suite",
    ),
    (
        code::DEPENDENCY,
        "Upstream service or system dependency failed",
        "Check code host permissions and installed toolchains",
    ),
    (
        code::TIMEOUT,
        "Operation timed out",
        "Increase timeout and retry",
    ),
    (
        code::INTERNAL,
        "Unexpected internal failure",
        "Inspect logs and retry command",
    ),
];

/// Get error code details (description and fix) for a given error code
#[must_use]
pub fn get_error_info(error_code: &str) -> Option<(&'static str, &'static str)> {
    ERROR_CODES
        .iter()
        .find(|(code, _, _)| *code == error_code)
        .map(|(_, desc, fix)| (*desc, *fix))
}

pub type Result<T> = std::result::Result<T, RemedyError>;
