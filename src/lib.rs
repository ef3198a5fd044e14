pub mod db;
pub mod dedup;
pub mod error;
pub mod gate;
pub mod installer;
pub mod ledger;
pub mod logs;
pub mod messages;
pub mod pipeline;
pub mod ports;
pub mod progress;
pub mod race;
pub mod remediation;
pub mod types;

#[cfg(test)]
mod test_support;

pub use db::RemedyDb;
pub use error::{code, RemedyError, Result};
pub use installer::{CommandPreparer, Ecosystem, InstallerCache};
pub use pipeline::{CheckSuiteHandler, PipelineOutcome, PipelineSettings};
pub use types::*;
