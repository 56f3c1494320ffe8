//! An in-memory [`RecordStore`], backed by a lock-guarded map. Grounded in
//! the same `Arc<RwLock<...>>` + "snapshot, then stream" shape as
//! `InMemoryEventStore` in the teacher's own in-memory event store: reads
//! clone out of the lock rather than holding it across an `.await`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use nexus::entity::{
    CommitAttempt, CommitError, CommittedEntry, ConcurrencyToken, EntityIdentifier, QueriedRecord, Record,
    RecordStore, StorageError,
};

/// A [`RecordStore`] that keeps every record in memory for the lifetime of
/// the process. Suitable for tests and local development; offers no
/// durability across restarts.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<EntityIdentifier, Record>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn query_entity(
        &self,
        identifier: &EntityIdentifier,
        _bypass_cache: bool,
    ) -> Result<Option<QueriedRecord>, StorageError> {
        Ok(self
            .records
            .read()
            .expect("record store lock poisoned")
            .get(identifier)
            .cloned()
            .map(|record| QueriedRecord {
                record,
                loaded_from_cache: false,
            }))
    }

    fn query_entities_by_type(&self, entity_type: &'static str) -> BoxStream<'static, Result<Record, StorageError>> {
        let snapshot: Vec<Record> = self
            .records
            .read()
            .expect("record store lock poisoned")
            .values()
            .filter(|record| record.identifier.entity_type == entity_type)
            .cloned()
            .collect();

        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }

    async fn process_commit_attempt(&self, attempt: &CommitAttempt) -> Result<Vec<CommittedEntry>, CommitError> {
        let mut records = self.records.write().expect("record store lock poisoned");

        let conflicts: Vec<EntityIdentifier> = attempt
            .entries
            .iter()
            .filter(|entry| {
                let current_token = records.get(&entry.identifier).map(|r| r.concurrency_token.clone());
                match entry.expected_concurrency_token.as_str() {
                    None => false,
                    Some(expected) => match current_token.as_ref().and_then(ConcurrencyToken::as_str) {
                        Some(actual) => actual != expected,
                        None => true,
                    },
                }
            })
            .map(|entry| entry.identifier.clone())
            .collect();

        if !conflicts.is_empty() {
            return Err(CommitError::ConcurrencyConflict(conflicts));
        }

        let mut committed = Vec::with_capacity(attempt.entries.len());

        for entry in &attempt.entries {
            match &entry.payload {
                Some(payload) => {
                    let new_token = ConcurrencyToken::new(format!("rev-{}", entry.revision));
                    records.insert(
                        entry.identifier.clone(),
                        Record {
                            identifier: entry.identifier.clone(),
                            revision: entry.revision,
                            concurrency_token: new_token.clone(),
                            payload: payload.clone(),
                            events: entry.events.clone(),
                        },
                    );
                    committed.push(CommittedEntry {
                        identifier: entry.identifier.clone(),
                        new_concurrency_token: new_token,
                        revision: entry.revision,
                    });
                }
                None => {
                    records.remove(&entry.identifier);
                    committed.push(CommittedEntry {
                        identifier: entry.identifier.clone(),
                        new_concurrency_token: ConcurrencyToken::any(),
                        revision: entry.revision,
                    });
                }
            }
        }

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus::entity::{CommitAttemptEntry, EntityIdentifier};
    use nexus::message::MessageType;

    fn id(n: &str) -> EntityIdentifier {
        EntityIdentifier::new("widget", n)
    }

    #[tokio::test]
    async fn query_entity_returns_none_for_an_unknown_identifier() {
        let store = InMemoryRecordStore::new();
        assert!(store.query_entity(&id("1"), false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn a_create_then_a_stale_update_conflicts() {
        let store = InMemoryRecordStore::new();

        let create = CommitAttempt {
            entries: vec![CommitAttemptEntry {
                identifier: id("1"),
                expected_concurrency_token: ConcurrencyToken::any(),
                revision: 1,
                payload: Some(b"{}".to_vec()),
                events: Vec::new(),
            }],
        };
        store.process_commit_attempt(&create).await.unwrap();

        let stale_update = CommitAttempt {
            entries: vec![CommitAttemptEntry {
                identifier: id("1"),
                expected_concurrency_token: ConcurrencyToken::new("rev-0"),
                revision: 2,
                payload: Some(b"{}".to_vec()),
                events: Vec::new(),
            }],
        };

        let err = store.process_commit_attempt(&stale_update).await.unwrap_err();
        assert!(matches!(err, CommitError::ConcurrencyConflict(ids) if ids == vec![id("1")]));
    }

    #[tokio::test]
    async fn a_conflicting_entry_rolls_back_the_whole_attempt() {
        let store = InMemoryRecordStore::new();

        let create = CommitAttempt {
            entries: vec![CommitAttemptEntry {
                identifier: id("1"),
                expected_concurrency_token: ConcurrencyToken::any(),
                revision: 1,
                payload: Some(b"{}".to_vec()),
                events: Vec::new(),
            }],
        };
        store.process_commit_attempt(&create).await.unwrap();

        let mixed = CommitAttempt {
            entries: vec![
                CommitAttemptEntry {
                    identifier: id("2"),
                    expected_concurrency_token: ConcurrencyToken::any(),
                    revision: 1,
                    payload: Some(b"{}".to_vec()),
                    events: Vec::new(),
                },
                CommitAttemptEntry {
                    identifier: id("1"),
                    expected_concurrency_token: ConcurrencyToken::new("stale"),
                    revision: 2,
                    payload: Some(b"{}".to_vec()),
                    events: Vec::new(),
                },
            ],
        };

        assert!(store.process_commit_attempt(&mixed).await.is_err());
        assert!(store.query_entity(&id("2"), false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_entities_by_type_filters_by_entity_type() {
        let store = InMemoryRecordStore::new();

        store
            .process_commit_attempt(&CommitAttempt {
                entries: vec![CommitAttemptEntry {
                    identifier: id("1"),
                    expected_concurrency_token: ConcurrencyToken::any(),
                    revision: 1,
                    payload: Some(b"{}".to_vec()),
                    events: vec![nexus::entity::DomainEvent::new(
                        MessageType::of::<()>(),
                        Vec::new(),
                    )],
                }],
            })
            .await
            .unwrap();

        let found: Vec<Record> = store
            .query_entities_by_type("widget")
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].identifier, id("1"));

        let none: Vec<Record> = store
            .query_entities_by_type("gadget")
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(none.is_empty());
    }
}
