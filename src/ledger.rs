//! Usage records: one row per remediation attempt, finalized exactly once.

use crate::ports::UsageStore;
use crate::{NewUsage, PullKey, Result, UsageCompletion, UsageId, UsageRecord};
use std::time::Instant;
use tracing::{info, warn};

/// A created, not-yet-completed usage record.
///
/// Finalizing consumes the value, so a record cannot be finalized twice.
#[derive(Debug)]
#[must_use = "an open usage record must be finalized"]
pub struct OpenUsage {
    record: UsageRecord,
    started: Instant,
}

impl OpenUsage {
    #[must_use]
    pub const fn id(&self) -> UsageId {
        self.record.id
    }

    #[must_use]
    pub const fn key(&self) -> PullKey {
        self.record.key
    }

    #[must_use]
    pub const fn record(&self) -> &UsageRecord {
        &self.record
    }

    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

pub struct UsageLedger<'a, S> {
    store: &'a S,
}

impl<'a, S> UsageLedger<'a, S>
where
    S: UsageStore + Sync,
{
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Persists a new attempt with `is_completed = false`.
    ///
    /// `started` is the invocation start; `total_seconds` is measured from it.
    ///
    /// # Errors
    /// Returns any persistence failure; never silently skips the insert.
    pub async fn create(&self, usage: &NewUsage, started: Instant) -> Result<OpenUsage> {
        let record = self.store.insert_usage(usage).await?;
        info!(
            usage_id = %record.id,
            key = %record.key,
            trigger = record.trigger.as_str(),
            "Created usage record"
        );
        Ok(OpenUsage { record, started })
    }

    /// Marks the attempt completed with its final totals.
    ///
    /// # Errors
    /// Returns any persistence failure.
    pub async fn finalize(&self, usage: OpenUsage, mut completion: UsageCompletion) -> Result<()> {
        completion.total_seconds = usage.elapsed_seconds();
        let usage_id = usage.id();
        let pr_number = usage.key().pr_number;

        self.store
            .finalize_usage(usage_id, pr_number, &completion)
            .await
            .map(|()| {
                info!(
                    usage_id = %usage_id,
                    token_input = completion.tokens.input_tokens,
                    token_output = completion.tokens.output_tokens,
                    total_seconds = completion.total_seconds,
                    "Finalized usage record"
                );
            })
            .map_err(|e| {
                warn!(usage_id = %usage_id, "Failed to finalize usage record: {e}");
                e
            })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::UsageLedger;
    use crate::test_support::MemoryStore;
    use crate::{NewUsage, PullKey, TokenUsage, Trigger, UsageCompletion};
    use std::time::Instant;

    #[tokio::test]
    async fn create_then_finalize_completes_record() {
        let store = MemoryStore::default();
        let ledger = UsageLedger::new(&store);
        let usage = NewUsage {
            key: PullKey::new(5, 77, 42),
            trigger: Trigger::TestFailure,
            installation_id: 313,
            owner_name: "acme".to_string(),
            repo_name: "web".to_string(),
        };

        let open = ledger.create(&usage, Instant::now()).await.unwrap();
        let id = open.id();
        assert!(!store.record(id).await.unwrap().is_completed);

        ledger
            .finalize(
                open,
                UsageCompletion {
                    tokens: TokenUsage::new(10, 4),
                    retry_workflow_id_hash_pairs: Some(vec!["1:abc".to_string()]),
                    ..UsageCompletion::default()
                },
            )
            .await
            .unwrap();

        let record = store.record(id).await.unwrap();
        assert!(record.is_completed);
        assert_eq!(record.tokens, TokenUsage::new(10, 4));
        assert_eq!(record.retry_workflow_id_hash_pairs, vec!["1:abc".to_string()]);
        assert_eq!(store.incomplete_count().await, 0);
    }
}
