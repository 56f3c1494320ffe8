//! The storage-engine boundary: how entities are actually read from and
//! written to durable storage, behind a `RecordStore` the host application
//! provides (an in-memory one lives in the companion `nexus-memory` crate).

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::entity::event::DomainEvent;
use crate::entity::identifier::{ConcurrencyToken, EntityIdentifier};

/// The wire form of a persisted entity: just enough for a `RecordStore` to
/// do its job without knowing anything about the application's entity
/// types. Entity (de)serialization is the host application's concern,
/// typically handled the same way [`crate::scope::MessageSerializer`]
/// handles messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub identifier: EntityIdentifier,
    pub revision: u64,
    pub concurrency_token: ConcurrencyToken,
    pub payload: Vec<u8>,
    pub events: Vec<DomainEvent>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage engine error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum CommitError {
    /// At least one entry's expected concurrency token didn't match what
    /// the store currently holds. All-or-nothing: none of the attempt's
    /// entries were persisted, including ones that matched.
    #[error("concurrency conflict on: {0:?}")]
    ConcurrencyConflict(Vec<EntityIdentifier>),
    #[error("storage engine error: {0}")]
    Backend(String),
}

/// A single-entity query result plus whether it was served from a cache
/// rather than the backing store -- spec's `loadedFromCache` taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueriedRecord {
    pub record: Record,
    pub loaded_from_cache: bool,
}

/// One entity's outcome within a successfully processed commit attempt.
#[derive(Debug, Clone)]
pub struct CommittedEntry {
    pub identifier: EntityIdentifier,
    pub new_concurrency_token: ConcurrencyToken,
    pub revision: u64,
}

/// One entity's participation in a commit attempt: either an upsert (`Some`
/// payload) or a removal (`None`).
#[derive(Debug, Clone)]
pub struct CommitAttemptEntry {
    pub identifier: EntityIdentifier,
    pub expected_concurrency_token: ConcurrencyToken,
    pub revision: u64,
    pub payload: Option<Vec<u8>>,
    pub events: Vec<DomainEvent>,
}

/// A batch of entity writes to apply atomically: either every entry's
/// concurrency check passes and all of them are persisted, or none are.
#[derive(Debug, Clone, Default)]
pub struct CommitAttempt {
    pub entries: Vec<CommitAttemptEntry>,
}

impl CommitAttempt {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The storage engine's interface: query a single entity by identifier,
/// stream every entity of a given type, and process a commit attempt under
/// an all-or-nothing concurrency check.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Looks up a single entity by identifier. `bypass_cache` asks an
    /// implementation that caches records to skip its cache and go straight
    /// to the backing store for this call; a non-caching implementation
    /// simply ignores it and always reports `loaded_from_cache: false`.
    async fn query_entity(
        &self,
        identifier: &EntityIdentifier,
        bypass_cache: bool,
    ) -> Result<Option<QueriedRecord>, StorageError>;

    /// A lazy sequence of every currently-stored record of `entity_type`.
    /// Implementations only ever yield records with `revision > 0` --
    /// deleted entities are filtered, mirroring how
    /// [`Self::process_commit_attempt`] removes a record entirely rather
    /// than leaving a revision-0 tombstone behind.
    fn query_entities_by_type(&self, entity_type: &'static str) -> BoxStream<'static, Result<Record, StorageError>>;

    async fn process_commit_attempt(&self, attempt: &CommitAttempt) -> Result<Vec<CommittedEntry>, CommitError>;
}
