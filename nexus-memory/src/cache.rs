//! A [`RecordStore`] decorator that serves single-entity queries from an
//! in-memory cache ahead of the wrapped store, the way
//! [`InMemoryRecordStore`](crate::store::InMemoryRecordStore) itself keeps
//! everything behind a lock-guarded map -- read-side state lives behind a
//! `RwLock`, cloned out before returning rather than held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use nexus::entity::{
    Cached, CommitAttempt, CommitError, CommittedEntry, EntityIdentifier, QueriedRecord, Record, RecordStore,
    StorageError,
};

/// Wraps an inner [`RecordStore`] with a time-to-live cache for single-entity
/// lookups. `query_entities_by_type` passes straight through uncached -- a
/// type stream is rarely re-queried the way a single identifier is, and
/// caching it would mean tracking eviction for sets instead of entries.
///
/// A commit evicts every entry it touches rather than patching the cache
/// with the commit's own `CommittedEntry` values: `process_commit_attempt`
/// only reports the new concurrency token and revision, not the persisted
/// payload, so there's nothing to repopulate the cache with short of
/// re-reading it from `inner` anyway.
pub struct CachingRecordStore {
    inner: Arc<dyn RecordStore>,
    ttl: Duration,
    cache: RwLock<HashMap<EntityIdentifier, Cached<Record>>>,
}

impl CachingRecordStore {
    pub fn new(inner: Arc<dyn RecordStore>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn fresh_hit(&self, identifier: &EntityIdentifier) -> Option<Record> {
        let cache = self.cache.read().expect("cache lock poisoned");
        let entry = cache.get(identifier)?;
        if entry.age() < self.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn remember(&self, identifier: EntityIdentifier, record: Record) {
        self.cache.write().expect("cache lock poisoned").insert(
            identifier,
            Cached {
                value: record,
                cached_at: std::time::Instant::now(),
            },
        );
    }

    fn forget(&self, identifier: &EntityIdentifier) {
        self.cache.write().expect("cache lock poisoned").remove(identifier);
    }
}

#[async_trait]
impl RecordStore for CachingRecordStore {
    async fn query_entity(
        &self,
        identifier: &EntityIdentifier,
        bypass_cache: bool,
    ) -> Result<Option<QueriedRecord>, StorageError> {
        if !bypass_cache {
            if let Some(record) = self.fresh_hit(identifier) {
                return Ok(Some(QueriedRecord {
                    record,
                    loaded_from_cache: true,
                }));
            }
        }

        match self.inner.query_entity(identifier, true).await? {
            Some(queried) => {
                self.remember(identifier.clone(), queried.record.clone());
                Ok(Some(QueriedRecord {
                    record: queried.record,
                    loaded_from_cache: false,
                }))
            }
            None => {
                self.forget(identifier);
                Ok(None)
            }
        }
    }

    fn query_entities_by_type(&self, entity_type: &'static str) -> BoxStream<'static, Result<Record, StorageError>> {
        self.inner.query_entities_by_type(entity_type)
    }

    async fn process_commit_attempt(&self, attempt: &CommitAttempt) -> Result<Vec<CommittedEntry>, CommitError> {
        let committed = self.inner.process_commit_attempt(attempt).await?;
        for entry in &committed {
            self.forget(&entry.identifier);
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus::entity::{CommitAttemptEntry, ConcurrencyToken};

    fn id(n: &str) -> EntityIdentifier {
        EntityIdentifier::new("widget", n)
    }

    async fn seeded(identifier: EntityIdentifier) -> CachingRecordStore {
        let inner = Arc::new(crate::store::InMemoryRecordStore::new());
        inner
            .process_commit_attempt(&CommitAttempt {
                entries: vec![CommitAttemptEntry {
                    identifier,
                    expected_concurrency_token: ConcurrencyToken::any(),
                    revision: 1,
                    payload: Some(b"{}".to_vec()),
                    events: Vec::new(),
                }],
            })
            .await
            .unwrap();
        CachingRecordStore::new(inner, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn a_second_query_is_served_from_cache() {
        let store = seeded(id("1")).await;

        let first = store.query_entity(&id("1"), false).await.unwrap().unwrap();
        assert!(!first.loaded_from_cache);

        let second = store.query_entity(&id("1"), false).await.unwrap().unwrap();
        assert!(second.loaded_from_cache);
        assert_eq!(second.record, first.record);
    }

    #[tokio::test]
    async fn bypass_cache_always_goes_to_the_backing_store() {
        let store = seeded(id("1")).await;

        store.query_entity(&id("1"), false).await.unwrap();
        let bypassed = store.query_entity(&id("1"), true).await.unwrap().unwrap();
        assert!(!bypassed.loaded_from_cache);
    }

    #[tokio::test]
    async fn a_commit_evicts_the_entries_it_touches() {
        let store = seeded(id("1")).await;

        store.query_entity(&id("1"), false).await.unwrap();
        store
            .process_commit_attempt(&CommitAttempt {
                entries: vec![CommitAttemptEntry {
                    identifier: id("1"),
                    expected_concurrency_token: ConcurrencyToken::new("rev-1"),
                    revision: 2,
                    payload: Some(b"{}".to_vec()),
                    events: Vec::new(),
                }],
            })
            .await
            .unwrap();

        let after_commit = store.query_entity(&id("1"), false).await.unwrap().unwrap();
        assert!(!after_commit.loaded_from_cache);
        assert_eq!(after_commit.record.revision, 2);
    }
}
