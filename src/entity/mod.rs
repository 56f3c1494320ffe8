//! The domain-storage core: entity identity, load-result taxonomy, the
//! unit-of-work identity map, and the commit pipeline that persists tracked
//! changes together with the domain events they raised.

pub mod commit;
pub mod engine;
pub mod event;
pub mod identifier;
pub mod load;
pub mod metadata;
pub mod storage;
pub mod tracked;

pub use commit::{commit, CommitContext};
pub use engine::{
    CommitAttempt, CommitAttemptEntry, CommitError, CommittedEntry, QueriedRecord, Record, RecordStore,
    StorageError,
};
pub use event::{DomainEvent, DomainEventCollection, DomainEventDispatcher};
pub use identifier::{ConcurrencyToken, EntityIdentifier};
pub use load::{Cached, EntityVerificationResult, FoundEntityQueryResult, NotFoundEntityQueryResult, Scoped};
pub use metadata::Entity;
pub use storage::EntityStorage;
pub use tracked::{TrackState, TrackedEntity};
