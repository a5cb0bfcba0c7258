//! SqliteStore against on-disk databases.

use std::sync::Arc;

use async_trait::async_trait;
use cadence_scheduler::{
    Account, AccountKind, AccountRegistry, ContentStore, Credentials, InvocationRequest, Payload,
    PublishError, PublishSink, Publisher, SchedulerError, SourceKey, SourceKind, StoreError,
    pick_next,
};
use cadence_store::SqliteStore;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn credentials() -> Credentials {
    Credentials {
        identifier: "feed.example.com".to_string(),
        app_password: "app-password".to_string(),
        pds_url: Some("https://pds.example.com".to_string()),
    }
}

fn image(name: &str) -> Payload {
    Payload::Image {
        location: format!("/srv/art/{}.jpg", name),
        caption: Some(name.to_string()),
        alt_text: None,
    }
}

fn open(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(dir.path().join("cadence.db")).unwrap()
}

/// Sink that accepts everything except one location.
struct AcceptingSink {
    reject: Option<String>,
}

#[async_trait]
impl PublishSink for AcceptingSink {
    async fn publish(
        &self,
        credentials: &Credentials,
        payload: &Payload,
    ) -> Result<String, PublishError> {
        if let (Some(reject), Payload::Image { location, .. }) = (&self.reject, payload) {
            if reject == location {
                return Err(PublishError::Content("404 Not Found".to_string()));
            }
        }
        Ok(format!(
            "at://{}/app.bsky.feed.post/{}",
            credentials.identifier,
            payload.describe().len()
        ))
    }
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let source = SourceKey::new(SourceKind::Artist, 9);
    let published_at = Utc::now() - Duration::hours(2);

    {
        let store = open(&dir);
        store
            .upsert_account(&Account::new(
                "painter",
                AccountKind::Artist { artist_id: 9 },
                credentials(),
            ))
            .unwrap();
        let id = store.insert_content_item(source, &image("one")).unwrap();
        store.mark_item_published(id, published_at).await.unwrap();
        store
            .mark_account_published("painter", published_at)
            .await
            .unwrap();
    }

    let store = open(&dir);
    let account = store.get_account("painter").await.unwrap().unwrap();
    assert_eq!(account.kind, AccountKind::Artist { artist_id: 9 });
    assert_eq!(account.credentials, credentials());
    assert_eq!(
        account.last_published.map(|t| t.timestamp_micros()),
        Some(published_at.timestamp_micros())
    );

    let items = store.content_items(&source).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].payload, image("one"));
    assert!(items[0].last_published.is_some());
}

#[tokio::test]
async fn test_due_accounts_order_and_filter() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let now = Utc::now();

    let mut recent = Account::new("recent", AccountKind::Tag { tag_id: 1 }, credentials());
    recent.last_published = Some(now - Duration::hours(1));
    let mut old = Account::new("old", AccountKind::Tag { tag_id: 2 }, credentials());
    old.last_published = Some(now - Duration::hours(30));
    let mut older = Account::new("older", AccountKind::Tag { tag_id: 3 }, credentials());
    older.last_published = Some(now - Duration::hours(40));
    let fresh = Account::new("fresh", AccountKind::Card, credentials());
    let mut off = Account::new("off", AccountKind::Tag { tag_id: 4 }, credentials());
    off.active = false;

    for account in [&recent, &old, &older, &fresh, &off] {
        store.upsert_account(account).unwrap();
    }

    let due = store
        .due_accounts(now - Duration::hours(6), 10)
        .await
        .unwrap();
    let ids: Vec<&str> = due.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["fresh", "older", "old"]);

    let due = store
        .due_accounts(now - Duration::hours(6), 2)
        .await
        .unwrap();
    assert_eq!(due.len(), 2);
}

#[tokio::test]
async fn test_undecodable_account_is_skipped_in_selection() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store
        .upsert_account(&Account::new("good", AccountKind::Card, credentials()))
        .unwrap();

    // Written by hand: a tag account with no tag id
    {
        let raw = rusqlite_raw(&dir);
        raw.execute(
            "INSERT INTO accounts (id, category, identifier, app_password)
             VALUES ('broken', 'tag', 'x', 'y')",
            [],
        )
        .unwrap();
    }

    let due = store.due_accounts(Utc::now(), 10).await.unwrap();
    let ids: Vec<&str> = due.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["good"]);

    assert!(matches!(
        store.get_account("broken").await,
        Err(StoreError::Corrupt(_))
    ));
}

#[tokio::test]
async fn test_forced_undecodable_account_is_corrupt_not_unavailable() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open(&dir));
    {
        let raw = rusqlite_raw(&dir);
        raw.execute(
            "INSERT INTO accounts (id, category, identifier, app_password)
             VALUES ('broken', 'artist', 'x', 'y')",
            [],
        )
        .unwrap();
    }

    let publisher = Publisher::new(
        Arc::clone(&store) as Arc<dyn AccountRegistry>,
        Arc::clone(&store) as Arc<dyn ContentStore>,
        Arc::new(AcceptingSink { reject: None }),
    );
    let result = publisher
        .run_invocation(InvocationRequest::new(Utc::now()).for_account("broken"))
        .await;

    assert!(
        matches!(result, Err(SchedulerError::Corrupt(_))),
        "expected corrupt record, got {:?}",
        result
    );
}

fn rusqlite_raw(dir: &TempDir) -> rusqlite::Connection {
    rusqlite::Connection::open(dir.path().join("cadence.db")).unwrap()
}

#[tokio::test]
async fn test_rotation_cycle_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let source = SourceKey::new(SourceKind::Subject, 5);
    let other = SourceKey::new(SourceKind::Subject, 6);
    let start = Utc::now() - Duration::days(1);

    let ids: Vec<i64> = (0..3)
        .map(|n| {
            store
                .insert_content_item(
                    source,
                    &Payload::Text {
                        body: format!("quote {}", n),
                    },
                )
                .unwrap()
        })
        .collect();
    store
        .insert_content_item(other, &image("elsewhere"))
        .unwrap();

    for (step, expected) in ids.iter().enumerate() {
        let pick = pick_next(&store, &source).await.unwrap().unwrap();
        assert_eq!(pick.item.id, *expected);
        assert!(!pick.exhausted);
        store
            .mark_item_published(pick.item.id, start + Duration::minutes(step as i64))
            .await
            .unwrap();
    }

    let pick = pick_next(&store, &source).await.unwrap().unwrap();
    assert!(pick.exhausted);
    assert_eq!(pick.item.id, ids[0]);

    assert_eq!(store.reset_source(&source).await.unwrap(), 3);
    assert!(
        store
            .content_items(&source)
            .unwrap()
            .iter()
            .all(|i| i.last_published.is_none())
    );
    // Other sources are untouched
    assert_eq!(store.content_items(&other).unwrap().len(), 1);
}

#[tokio::test]
async fn test_mark_unknown_rows_is_not_found() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.mark_item_published(404, Utc::now()).await.is_err());
    assert!(
        store
            .mark_account_published("ghost", Utc::now())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_invocation_against_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open(&dir));
    let source = SourceKey::new(SourceKind::Tag, 3);

    store
        .upsert_account(&Account::new(
            "landscapes",
            AccountKind::Tag { tag_id: 3 },
            credentials(),
        ))
        .unwrap();
    let missing = store.insert_content_item(source, &image("missing")).unwrap();
    let good = store.insert_content_item(source, &image("valley")).unwrap();

    let sink = Arc::new(AcceptingSink {
        reject: Some("/srv/art/missing.jpg".to_string()),
    });
    let publisher = Publisher::new(
        Arc::clone(&store) as Arc<dyn AccountRegistry>,
        Arc::clone(&store) as Arc<dyn ContentStore>,
        sink,
    );

    let now = Utc::now();
    let report = publisher
        .run_invocation(InvocationRequest::new(now))
        .await
        .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.published[0].item_id, Some(good));

    let items = store.content_items(&source).unwrap();
    assert!(items.iter().all(|i| i.last_published.is_some()));
    assert_eq!(items[0].id, missing);

    let log = store.recent_outcomes(10).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].account_id, "landscapes");
    assert!(log[0].external_id.starts_with("at://"));

    // Not due again within the interval
    let report = publisher
        .run_invocation(InvocationRequest::new(now + Duration::minutes(10)))
        .await
        .unwrap();
    assert_eq!(report.processed, 0);
    assert!(report.failures.is_empty());
}
