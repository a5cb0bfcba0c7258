//! SQLite database for accounts, content items, and the publish log.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cadence_scheduler::{
    Account, AccountKind, Category, ContentItem, Credentials, Payload, PublishOutcome, SourceKey,
    SourceKind, StoreError,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row, params};
use tracing::{debug, info};

/// SQLite-backed account registry and content store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY,
        category TEXT NOT NULL,
        source_id INTEGER,
        identifier TEXT NOT NULL,
        app_password TEXT NOT NULL,
        pds_url TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        last_published TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_accounts_due ON accounts(active, last_published);

    CREATE TABLE IF NOT EXISTS content_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_kind TEXT NOT NULL,
        source_id INTEGER NOT NULL,
        payload TEXT NOT NULL,
        last_published TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_items_source
        ON content_items(source_kind, source_id, last_published);

    CREATE TABLE IF NOT EXISTS publish_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id TEXT NOT NULL,
        item_id INTEGER,
        external_id TEXT NOT NULL,
        published_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_log_account ON publish_log(account_id, published_at);
";

pub(crate) const ACCOUNT_COLUMNS: &str =
    "id, category, source_id, identifier, app_password, pds_url, active, last_published";

pub(crate) const ITEM_COLUMNS: &str = "id, source_kind, source_id, payload, last_published";

impl SqliteStore {
    /// Open or create the SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(backend)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(backend)?;

        let store = Self::init(conn)?;
        info!(path = %path.display(), "database initialized");
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Provisioning
    // =========================================================================

    /// Insert an account, or update its kind and credentials if it exists.
    ///
    /// An existing account keeps its active flag and last-published time.
    pub fn upsert_account(&self, account: &Account) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO accounts
             (id, category, source_id, identifier, app_password, pds_url, active, last_published)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                category = excluded.category,
                source_id = excluded.source_id,
                identifier = excluded.identifier,
                app_password = excluded.app_password,
                pds_url = excluded.pds_url",
            params![
                account.id,
                account.kind.category().as_str(),
                account.kind.source_id(),
                account.credentials.identifier,
                account.credentials.app_password,
                account.credentials.pds_url,
                account.active,
                account.last_published.map(encode_time),
            ],
        )
        .map_err(backend)?;
        debug!(account = %account.id, "upserted account");
        Ok(())
    }

    /// Activate or deactivate an account. Returns false if it does not exist.
    pub fn set_active(&self, id: &str, active: bool) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE accounts SET active = ?2 WHERE id = ?1",
                params![id, active],
            )
            .map_err(backend)?;
        Ok(changed > 0)
    }

    /// All accounts, ordered by id.
    pub fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM accounts ORDER BY id",
                ACCOUNT_COLUMNS
            ))
            .map_err(backend)?;

        let rows = stmt
            .query_map([], AccountRow::from_row)
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;

        rows.into_iter().map(AccountRow::into_account).collect()
    }

    /// Add a never-published content item, returning its id.
    pub fn insert_content_item(
        &self,
        source: SourceKey,
        payload: &Payload,
    ) -> Result<i64, StoreError> {
        let json = serde_json::to_string(payload)
            .map_err(|e| StoreError::Corrupt(format!("failed to encode payload: {}", e)))?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO content_items (source_kind, source_id, payload) VALUES (?1, ?2, ?3)",
            params![source.kind.as_str(), source.id, json],
        )
        .map_err(backend)?;
        Ok(conn.last_insert_rowid())
    }

    /// Items under `source`, in creation order.
    pub fn content_items(&self, source: &SourceKey) -> Result<Vec<ContentItem>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM content_items
                 WHERE source_kind = ?1 AND source_id = ?2 ORDER BY id",
                ITEM_COLUMNS
            ))
            .map_err(backend)?;

        let rows = stmt
            .query_map(params![source.kind.as_str(), source.id], ItemRow::from_row)
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;

        rows.into_iter().map(ItemRow::into_item).collect()
    }

    /// Most recent publish log entries, newest first.
    pub fn recent_outcomes(&self, limit: usize) -> Result<Vec<PublishOutcome>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT account_id, item_id, external_id, published_at
                 FROM publish_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(backend)?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;

        rows.into_iter()
            .map(|(account_id, item_id, external_id, published_at)| {
                Ok(PublishOutcome {
                    account_id,
                    item_id,
                    external_id,
                    published_at: decode_time(&published_at)?,
                })
            })
            .collect()
    }
}

/// Raw account columns, decoded outside the row callback so that a
/// malformed row surfaces as [`StoreError::Corrupt`].
pub(crate) struct AccountRow {
    id: String,
    category: String,
    source_id: Option<i64>,
    identifier: String,
    app_password: String,
    pds_url: Option<String>,
    active: bool,
    last_published: Option<String>,
}

impl AccountRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            category: row.get(1)?,
            source_id: row.get(2)?,
            identifier: row.get(3)?,
            app_password: row.get(4)?,
            pds_url: row.get(5)?,
            active: row.get(6)?,
            last_published: row.get(7)?,
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn into_account(self) -> Result<Account, StoreError> {
        let category: Category = self
            .category
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("account {}: {}", self.id, e)))?;
        let kind = AccountKind::from_parts(category, self.source_id)
            .map_err(|e| StoreError::Corrupt(format!("account {}: {}", self.id, e)))?;
        let last_published = self.last_published.as_deref().map(decode_time).transpose()?;

        Ok(Account {
            id: self.id,
            kind,
            active: self.active,
            credentials: Credentials {
                identifier: self.identifier,
                app_password: self.app_password,
                pds_url: self.pds_url,
            },
            last_published,
        })
    }
}

pub(crate) struct ItemRow {
    id: i64,
    source_kind: String,
    source_id: i64,
    payload: String,
    last_published: Option<String>,
}

impl ItemRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_kind: row.get(1)?,
            source_id: row.get(2)?,
            payload: row.get(3)?,
            last_published: row.get(4)?,
        })
    }

    pub(crate) fn into_item(self) -> Result<ContentItem, StoreError> {
        let kind: SourceKind = self
            .source_kind
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("content item {}: {}", self.id, e)))?;
        let payload: Payload = serde_json::from_str(&self.payload).map_err(|e| {
            StoreError::Corrupt(format!("content item {}: bad payload: {}", self.id, e))
        })?;
        let last_published = self.last_published.as_deref().map(decode_time).transpose()?;

        Ok(ContentItem {
            id: self.id,
            source: SourceKey::new(kind, self.source_id),
            payload,
            last_published,
        })
    }
}

/// Fixed-width UTC timestamps, so text ordering matches time ordering.
pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", s, e)))
}

pub(crate) fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Extension trait for optional query results.
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_encoded_times_sort_as_text() {
        let base = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let earlier = encode_time(base + Duration::milliseconds(999));
        let later = encode_time(base + Duration::seconds(1));
        assert_eq!(earlier.len(), later.len());
        assert!(earlier < later);
    }

    #[test]
    fn test_decode_time_round_trip() {
        let at = Utc::now();
        let decoded = decode_time(&encode_time(at)).unwrap();
        assert_eq!(decoded.timestamp_micros(), at.timestamp_micros());
        assert!(matches!(decode_time("yesterday"), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_upsert_keeps_rotation_state() {
        let store = SqliteStore::open_in_memory().unwrap();
        let credentials = Credentials {
            identifier: "feed.example.com".to_string(),
            app_password: "one".to_string(),
            pds_url: None,
        };
        let mut account = Account::new("feed", AccountKind::Tag { tag_id: 2 }, credentials);
        account.last_published = Some(Utc::now());
        store.upsert_account(&account).unwrap();

        account.credentials.app_password = "two".to_string();
        account.last_published = None;
        store.upsert_account(&account).unwrap();

        let stored = store.list_accounts().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].credentials.app_password, "two");
        assert!(stored[0].last_published.is_some());
    }

    #[test]
    fn test_set_active_unknown_account() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.set_active("missing", false).unwrap());
    }

    #[test]
    fn test_corrupt_category_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO accounts (id, category, identifier, app_password)
                 VALUES ('bad', 'video', 'x', 'y')",
                [],
            )
            .unwrap();
        assert!(matches!(store.list_accounts(), Err(StoreError::Corrupt(_))));
    }
}
