mod event;
mod identifiers;
mod tokens;
mod usage;

pub use event::{
    CheckRun, CheckSuite, CheckSuiteEvent, CheckSuitePayload, Installation, Owner,
    PullRequestLink, Repository, Sender,
};
pub use identifiers::{CommentId, PullKey, RepoRef, ThreadId, UsageId};
pub use tokens::TokenUsage;
pub use usage::{NewUsage, RepositorySettings, Trigger, UsageCompletion, UsageRecord};
