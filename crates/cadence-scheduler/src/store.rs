//! Durable state consumed by the scheduler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Account, ContentItem, PublishOutcome, SourceKey, StoreError};

/// Storage of publisher accounts.
#[async_trait]
pub trait AccountRegistry: Send + Sync {
    /// Active accounts never published or last published before `cutoff`,
    /// never-published first, then oldest first, at most `limit` of them.
    async fn due_accounts(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Account>, StoreError>;

    /// Look up one account by id, active or not.
    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError>;

    /// Record a successful publish for the account.
    async fn mark_account_published(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Storage of content items grouped by source key.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// The first never-published item under `source`, in creation order.
    async fn next_unpublished(
        &self,
        source: &SourceKey,
    ) -> Result<Option<ContentItem>, StoreError>;

    /// The item under `source` with the oldest last-published time.
    async fn least_recently_published(
        &self,
        source: &SourceKey,
    ) -> Result<Option<ContentItem>, StoreError>;

    /// Set an item's last-published time, whether it was delivered or skipped.
    async fn mark_item_published(
        &self,
        item_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Clear last-published on every item under `source`, returning the count.
    async fn reset_source(&self, source: &SourceKey) -> Result<u64, StoreError>;

    /// Append a publish record to the log.
    async fn record_outcome(&self, outcome: &PublishOutcome) -> Result<(), StoreError>;
}
