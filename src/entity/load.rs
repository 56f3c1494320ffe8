//! The outcomes a storage-engine query can produce for a single entity
//! lookup, and the scoping/caching/tracking wrappers built on top of them.

use std::time::Instant;

use crate::entity::identifier::{ConcurrencyToken, EntityIdentifier};
use crate::entity::metadata::Entity;
use crate::entity::tracked::TrackedEntity;
use crate::scope::Scope;

/// An entity was found and loaded.
#[derive(Debug, Clone)]
pub struct FoundEntityQueryResult<E> {
    pub identifier: EntityIdentifier,
    pub entity: E,
    pub concurrency_token: ConcurrencyToken,
    pub revision: u64,
    /// Whether this result was served from a `RecordStore`'s cache rather
    /// than its backing storage.
    pub loaded_from_cache: bool,
}

/// No record exists for the identifier queried.
#[derive(Debug, Clone)]
pub struct NotFoundEntityQueryResult {
    pub identifier: EntityIdentifier,
    pub loaded_from_cache: bool,
}

/// Every outcome a single-entity query can produce. `VerificationFailed`
/// covers cases the storage engine can detect but can't resolve into either
/// of the other two -- a corrupt record, a revision the deserializer can't
/// read, a concurrency token in an engine-specific format it no longer
/// recognizes.
#[derive(Debug, Clone)]
pub enum EntityVerificationResult<E> {
    Found(FoundEntityQueryResult<E>),
    NotFound(NotFoundEntityQueryResult),
    VerificationFailed {
        identifier: EntityIdentifier,
        reason: String,
    },
}

impl<E> EntityVerificationResult<E> {
    pub fn identifier(&self) -> &EntityIdentifier {
        match self {
            Self::Found(found) => &found.identifier,
            Self::NotFound(not_found) => &not_found.identifier,
            Self::VerificationFailed { identifier, .. } => identifier,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn is_verification_failed(&self) -> bool {
        matches!(self, Self::VerificationFailed { .. })
    }

    /// Found and NotFound results can be meaningfully scoped and cached;
    /// a verification failure can't, since there's nothing trustworthy to
    /// attach a scope or cache entry to.
    pub fn is_scopeable(&self) -> bool {
        !self.is_verification_failed()
    }

    /// Found and NotFound results can become a [`TrackedEntity`] (the
    /// latter as the starting point for creating a new one); a verification
    /// failure can't be tracked for mutation.
    pub fn is_trackable(&self) -> bool {
        !self.is_verification_failed()
    }

    /// Whether this result was served from a `RecordStore`'s cache.
    /// `VerificationFailed` is never cached, since it isn't scopeable or
    /// trackable either.
    pub fn loaded_from_cache(&self) -> bool {
        match self {
            Self::Found(found) => found.loaded_from_cache,
            Self::NotFound(not_found) => not_found.loaded_from_cache,
            Self::VerificationFailed { .. } => false,
        }
    }

    /// Toggles the `loadedFromCache` flag without otherwise changing the
    /// result -- a `RecordStore` decorator calls this to mark a cache hit
    /// after the inner store already decided what was found, or a caller
    /// bypassing the cache calls it to clear a stale flag.
    #[must_use]
    pub fn as_cached_result(mut self, loaded_from_cache: bool) -> Self {
        match &mut self {
            Self::Found(found) => found.loaded_from_cache = loaded_from_cache,
            Self::NotFound(not_found) => not_found.loaded_from_cache = loaded_from_cache,
            Self::VerificationFailed { .. } => {}
        }
        self
    }

    #[must_use]
    pub fn scoped_to(self, scope: Scope) -> Scoped<Self> {
        Scoped { value: self, scope }
    }

    #[must_use]
    pub fn cached(self) -> Cached<Self> {
        Cached {
            value: self,
            cached_at: Instant::now(),
        }
    }
}

impl<E> EntityVerificationResult<E>
where
    E: Entity,
{
    /// Converts into a [`TrackedEntity`] ready for mutation, or `None` for a
    /// verification failure.
    pub fn into_tracked(self) -> Option<TrackedEntity<E>> {
        if self.is_verification_failed() {
            return None;
        }
        Some(TrackedEntity::from_load_result(self))
    }
}

/// An [`EntityVerificationResult`] (or other load-result value) annotated
/// with the [`Scope`] it was resolved within.
#[derive(Debug, Clone)]
pub struct Scoped<T> {
    pub value: T,
    pub scope: Scope,
}

/// An [`EntityVerificationResult`] (or other load-result value) annotated
/// with when it was cached, for the storage engine's own cache-invalidation
/// policy to consult.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub cached_at: Instant,
}

impl<T> Cached<T> {
    pub fn age(&self) -> std::time::Duration {
        self.cached_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_failure_is_neither_scopeable_nor_trackable() {
        let result: EntityVerificationResult<()> = EntityVerificationResult::VerificationFailed {
            identifier: EntityIdentifier::new("widget", "1"),
            reason: "corrupt record".into(),
        };

        assert!(!result.is_scopeable());
        assert!(!result.is_trackable());
        assert!(!result.is_found());
    }

    #[test]
    fn not_found_is_scopeable_and_trackable_but_not_found() {
        let result: EntityVerificationResult<()> =
            EntityVerificationResult::NotFound(NotFoundEntityQueryResult {
                identifier: EntityIdentifier::new("widget", "1"),
                loaded_from_cache: false,
            });

        assert!(result.is_scopeable());
        assert!(result.is_trackable());
        assert!(!result.is_found());
    }

    #[test]
    fn as_cached_result_toggles_the_flag_without_changing_the_outcome() {
        let result: EntityVerificationResult<()> =
            EntityVerificationResult::NotFound(NotFoundEntityQueryResult {
                identifier: EntityIdentifier::new("widget", "1"),
                loaded_from_cache: false,
            });
        assert!(!result.loaded_from_cache());

        let result = result.as_cached_result(true);
        assert!(result.loaded_from_cache());
        assert!(!result.is_found());
    }
}
