//! Earliest-wins arbitration among concurrent attempts for one pull request.
//!
//! Arbitration reads persisted usage rows instead of taking a lock, so it
//! works across process instances. It must run after the caller's own usage
//! row is persisted, otherwise two callers could both see an empty field.

use crate::ports::UsageStore;
use crate::{PullKey, Result, UsageId, UsageRecord};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceDecision {
    Proceed,
    Defer { older: UsageRecord },
}

impl RaceDecision {
    #[must_use]
    pub const fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

pub struct RaceArbiter<'a, S> {
    store: &'a S,
}

impl<'a, S> RaceArbiter<'a, S>
where
    S: UsageStore + Sync,
{
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// # Errors
    /// Returns any persistence failure.
    pub async fn find_older_active(
        &self,
        key: PullKey,
        current: UsageId,
    ) -> Result<Option<UsageRecord>> {
        self.store.find_older_active(key, current).await
    }

    /// # Errors
    /// Returns any persistence failure.
    pub async fn arbitrate(&self, key: PullKey, current: UsageId) -> Result<RaceDecision> {
        match self.find_older_active(key, current).await? {
            Some(older) => {
                info!(
                    %key,
                    current = %current,
                    older = %older.id,
                    older_created_at = %older.created_at,
                    "Deferring to older active attempt"
                );
                Ok(RaceDecision::Defer { older })
            }
            None => {
                debug!(%key, current = %current, "No older active attempt");
                Ok(RaceDecision::Proceed)
            }
        }
    }
}
