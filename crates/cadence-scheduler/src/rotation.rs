//! Content rotation: picking the next item and resetting exhausted cycles.

use tracing::{debug, info};

use crate::{ContentItem, ContentStore, SourceKey, StoreError};

/// The next item to publish for a content source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick {
    pub item: ContentItem,
    /// True if every item had already been published and this pick is a repeat.
    pub exhausted: bool,
}

/// Pick the next item under `source`.
///
/// Never-published items come first, in creation order. Once none are left,
/// the least recently published item is returned with `exhausted` set; the
/// caller is responsible for resetting the cycle. Returns `None` only if the
/// source has no items at all. Read-only.
#[tracing::instrument(skip(store, source), fields(source = %source))]
pub async fn pick_next(
    store: &dyn ContentStore,
    source: &SourceKey,
) -> Result<Option<Pick>, StoreError> {
    if let Some(item) = store.next_unpublished(source).await? {
        debug!(item_id = item.id, "picked never-published item");
        return Ok(Some(Pick {
            item,
            exhausted: false,
        }));
    }

    match store.least_recently_published(source).await? {
        Some(item) => {
            debug!(item_id = item.id, last_published = ?item.last_published, "source exhausted, picked oldest item");
            Ok(Some(Pick {
                item,
                exhausted: true,
            }))
        }
        None => Ok(None),
    }
}

/// Clear last-published on every item under `source`.
///
/// Idempotent: resetting an already-cleared source changes nothing.
#[tracing::instrument(skip(store, source), fields(source = %source))]
pub async fn reset_all(store: &dyn ContentStore, source: &SourceKey) -> Result<u64, StoreError> {
    let count = store.reset_source(source).await?;
    info!(count, "reset content cycle");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, Payload, SourceKind};
    use chrono::{Duration, Utc};
    use std::collections::HashSet;

    fn image(n: usize) -> Payload {
        Payload::Image {
            location: format!("/art/{}.png", n),
            caption: None,
            alt_text: None,
        }
    }

    fn seeded(count: usize) -> (MemoryStore, SourceKey, Vec<i64>) {
        let store = MemoryStore::new();
        let source = SourceKey::new(SourceKind::Artist, 1);
        let ids = (0..count).map(|n| store.add_item(source, image(n))).collect();
        (store, source, ids)
    }

    #[tokio::test]
    async fn test_pick_prefers_never_published_in_creation_order() {
        let (store, source, ids) = seeded(3);
        store.set_item_last_published(ids[0], Some(Utc::now()));

        let pick = pick_next(&store, &source).await.unwrap().unwrap();
        assert_eq!(pick.item.id, ids[1]);
        assert!(!pick.exhausted);
    }

    #[tokio::test]
    async fn test_pick_falls_back_to_oldest_and_flags_exhaustion() {
        let (store, source, ids) = seeded(3);
        let now = Utc::now();
        store.set_item_last_published(ids[0], Some(now - Duration::hours(1)));
        store.set_item_last_published(ids[1], Some(now - Duration::hours(3)));
        store.set_item_last_published(ids[2], Some(now - Duration::hours(2)));

        let pick = pick_next(&store, &source).await.unwrap().unwrap();
        assert_eq!(pick.item.id, ids[1]);
        assert!(pick.exhausted);
    }

    #[tokio::test]
    async fn test_pick_empty_source_is_none() {
        let store = MemoryStore::new();
        let source = SourceKey::new(SourceKind::Tag, 42);
        assert!(pick_next(&store, &source).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_all_is_idempotent() {
        let (store, source, ids) = seeded(2);
        for id in &ids {
            store.set_item_last_published(*id, Some(Utc::now()));
        }

        assert_eq!(reset_all(&store, &source).await.unwrap(), 2);
        assert_eq!(reset_all(&store, &source).await.unwrap(), 2);
        assert!(store.items(&source).iter().all(|i| i.last_published.is_none()));
    }

    #[tokio::test]
    async fn test_no_repeat_before_cycle_completes() {
        let (store, source, ids) = seeded(5);
        let mut seen = HashSet::new();
        let start = Utc::now();

        for step in 0..ids.len() {
            let pick = pick_next(&store, &source).await.unwrap().unwrap();
            assert!(!pick.exhausted);
            assert!(seen.insert(pick.item.id), "item {} picked twice", pick.item.id);
            store
                .mark_item_published(pick.item.id, start + Duration::minutes(step as i64))
                .await
                .unwrap();
        }

        let pick = pick_next(&store, &source).await.unwrap().unwrap();
        assert!(pick.exhausted);
        assert_eq!(pick.item.id, ids[0]);
    }
}
