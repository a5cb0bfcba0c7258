//! Registry and content-store implementations over SQLite.

use async_trait::async_trait;
use cadence_scheduler::{
    Account, AccountRegistry, ContentItem, ContentStore, PublishOutcome, SourceKey, StoreError,
};
use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::{debug, warn};

use crate::SqliteStore;
use crate::db::{
    ACCOUNT_COLUMNS, AccountRow, ITEM_COLUMNS, ItemRow, OptionalExt, backend, encode_time,
};

impl SqliteStore {
    fn item_query(
        &self,
        filter: &str,
        source: &SourceKey,
    ) -> Result<Option<ContentItem>, StoreError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM content_items
                     WHERE source_kind = ?1 AND source_id = ?2 {}
                     LIMIT 1",
                    ITEM_COLUMNS, filter
                ),
                params![source.kind.as_str(), source.id],
                ItemRow::from_row,
            )
            .optional()
            .map_err(backend)?;

        row.map(ItemRow::into_item).transpose()
    }
}

#[async_trait]
impl AccountRegistry for SqliteStore {
    #[tracing::instrument(skip(self))]
    async fn due_accounts(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Account>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM accounts
                 WHERE active = 1 AND (last_published IS NULL OR last_published < ?1)
                 ORDER BY last_published IS NOT NULL, last_published ASC, id ASC
                 LIMIT ?2",
                ACCOUNT_COLUMNS
            ))
            .map_err(backend)?;

        let rows = stmt
            .query_map(params![encode_time(cutoff), limit as i64], AccountRow::from_row)
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;

        // One bad row must not stall every other account
        let mut due = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id().to_string();
            match row.into_account() {
                Ok(account) => due.push(account),
                Err(e) => warn!(account = %id, error = %e, "skipping undecodable account"),
            }
        }

        debug!(count = due.len(), "loaded due accounts");
        Ok(due)
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS),
                params![id],
                AccountRow::from_row,
            )
            .optional()
            .map_err(backend)?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn mark_account_published(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE accounts SET last_published = ?2 WHERE id = ?1",
                params![id, encode_time(at)],
            )
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("account {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn next_unpublished(
        &self,
        source: &SourceKey,
    ) -> Result<Option<ContentItem>, StoreError> {
        self.item_query("AND last_published IS NULL ORDER BY id ASC", source)
    }

    async fn least_recently_published(
        &self,
        source: &SourceKey,
    ) -> Result<Option<ContentItem>, StoreError> {
        self.item_query("ORDER BY last_published ASC, id ASC", source)
    }

    async fn mark_item_published(
        &self,
        item_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE content_items SET last_published = ?2 WHERE id = ?1",
                params![item_id, encode_time(at)],
            )
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("content item {}", item_id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, source), fields(source = %source))]
    async fn reset_source(&self, source: &SourceKey) -> Result<u64, StoreError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE content_items SET last_published = NULL
                 WHERE source_kind = ?1 AND source_id = ?2",
                params![source.kind.as_str(), source.id],
            )
            .map_err(backend)?;
        Ok(changed as u64)
    }

    async fn record_outcome(&self, outcome: &PublishOutcome) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO publish_log (account_id, item_id, external_id, published_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                outcome.account_id,
                outcome.item_id,
                outcome.external_id,
                encode_time(outcome.published_at),
            ],
        )
        .map_err(backend)?;
        Ok(())
    }
}
