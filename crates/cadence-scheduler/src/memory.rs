//! In-process account registry and content store.
//!
//! Holds everything in a single mutex-guarded table set. Used when embedding
//! the scheduler without a database, and by tests that need to inspect
//! rotation state directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Account, AccountRegistry, ContentItem, ContentStore, Payload, PublishOutcome, SourceKey,
    StoreError, due_order, is_due,
};

#[derive(Default)]
struct Tables {
    accounts: Vec<Account>,
    items: Vec<ContentItem>,
    outcomes: Vec<PublishOutcome>,
    next_item_id: i64,
    reset_calls: usize,
}

/// Memory-backed implementation of [`AccountRegistry`] and [`ContentStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    /// Make every subsequent store call fail with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert an account, replacing any existing account with the same id.
    pub fn insert_account(&self, account: Account) {
        let mut tables = self.tables();
        tables.accounts.retain(|a| a.id != account.id);
        tables.accounts.push(account);
    }

    /// Add a never-published item under `source`, returning its id.
    pub fn add_item(&self, source: SourceKey, payload: Payload) -> i64 {
        let mut tables = self.tables();
        tables.next_item_id += 1;
        let id = tables.next_item_id;
        tables.items.push(ContentItem {
            id,
            source,
            payload,
            last_published: None,
        });
        id
    }

    /// Overwrite an item's last-published time.
    pub fn set_item_last_published(&self, item_id: i64, at: Option<DateTime<Utc>>) {
        if let Some(item) = self.tables().items.iter_mut().find(|i| i.id == item_id) {
            item.last_published = at;
        }
    }

    pub fn account(&self, id: &str) -> Option<Account> {
        self.tables().accounts.iter().find(|a| a.id == id).cloned()
    }

    pub fn item(&self, item_id: i64) -> Option<ContentItem> {
        self.tables().items.iter().find(|i| i.id == item_id).cloned()
    }

    /// Items under `source`, in creation order.
    pub fn items(&self, source: &SourceKey) -> Vec<ContentItem> {
        self.tables()
            .items
            .iter()
            .filter(|i| &i.source == source)
            .cloned()
            .collect()
    }

    /// Every recorded publish outcome, oldest first.
    pub fn outcomes(&self) -> Vec<PublishOutcome> {
        self.tables().outcomes.clone()
    }

    /// Number of `reset_source` calls served so far.
    pub fn reset_calls(&self) -> usize {
        self.tables().reset_calls
    }
}

#[async_trait]
impl AccountRegistry for MemoryStore {
    async fn due_accounts(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Account>, StoreError> {
        self.check_available()?;
        let mut due: Vec<Account> = self
            .tables()
            .accounts
            .iter()
            .filter(|a| is_due(a, cutoff))
            .cloned()
            .collect();
        due.sort_by(due_order);
        due.truncate(limit);
        Ok(due)
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        self.check_available()?;
        Ok(self.account(id))
    }

    async fn mark_account_published(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables();
        let account = tables
            .accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))?;
        account.last_published = Some(at);
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn next_unpublished(
        &self,
        source: &SourceKey,
    ) -> Result<Option<ContentItem>, StoreError> {
        self.check_available()?;
        Ok(self
            .tables()
            .items
            .iter()
            .find(|i| &i.source == source && i.last_published.is_none())
            .cloned())
    }

    async fn least_recently_published(
        &self,
        source: &SourceKey,
    ) -> Result<Option<ContentItem>, StoreError> {
        self.check_available()?;
        // min_by_key keeps the first of equal keys, so ties go to creation order
        Ok(self
            .tables()
            .items
            .iter()
            .filter(|i| &i.source == source)
            .min_by_key(|i| i.last_published)
            .cloned())
    }

    async fn mark_item_published(
        &self,
        item_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables();
        let item = tables
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| StoreError::NotFound(format!("content item {}", item_id)))?;
        item.last_published = Some(at);
        Ok(())
    }

    async fn reset_source(&self, source: &SourceKey) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut tables = self.tables();
        tables.reset_calls += 1;
        let mut count = 0;
        for item in tables.items.iter_mut().filter(|i| &i.source == source) {
            item.last_published = None;
            count += 1;
        }
        Ok(count)
    }

    async fn record_outcome(&self, outcome: &PublishOutcome) -> Result<(), StoreError> {
        self.check_available()?;
        self.tables().outcomes.push(outcome.clone());
        Ok(())
    }
}
