//! An entity under active mutation within a unit of work, plus the state
//! machine tracking whether it needs to be written back.

use crate::entity::identifier::{ConcurrencyToken, EntityIdentifier};
use crate::entity::load::EntityVerificationResult;
use crate::entity::metadata::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Loaded, not yet mutated.
    Unchanged,
    /// Loaded and found nothing; no record exists and none has been staged
    /// for creation. Not dirty -- a bare load of a missing entity that the
    /// handler never acts on must not produce a commit entry.
    NonExistent,
    /// Staged for creation; no record exists yet.
    New,
    /// Loaded and since mutated.
    Modified,
    /// Staged for deletion.
    Removed,
}

/// An entity plus the bookkeeping [`crate::entity::storage::EntityStorage`]
/// needs to decide whether, and how, to persist it on commit.
pub struct TrackedEntity<E> {
    identifier: EntityIdentifier,
    entity: Option<E>,
    state: TrackState,
    original_concurrency_token: ConcurrencyToken,
}

impl<E> TrackedEntity<E>
where
    E: Entity,
{
    /// Starts tracking a brand-new entity, not backed by any existing
    /// record.
    pub fn new(identifier: EntityIdentifier, entity: E) -> Self {
        Self {
            identifier,
            entity: Some(entity),
            state: TrackState::New,
            original_concurrency_token: ConcurrencyToken::any(),
        }
    }

    /// Builds a [`TrackedEntity`] from a storage-engine query result. Panics
    /// on a verification failure -- callers are expected to have already
    /// checked [`EntityVerificationResult::is_trackable`].
    ///
    /// A `NotFound` result lands in `NonExistent`, not `New` -- spec §4.G: "a
    /// TrackedEntity created by a bare load (no mutation) has trackState
    /// `Unchanged` or `NonExistent` and contributes no commit entry". Only
    /// [`Self::install`]/[`Self::replace`] actually staging an entity for
    /// creation promotes it to `New`.
    pub fn from_load_result(result: EntityVerificationResult<E>) -> Self {
        match result {
            EntityVerificationResult::Found(found) => Self {
                identifier: found.identifier,
                entity: Some(found.entity),
                state: TrackState::Unchanged,
                original_concurrency_token: found.concurrency_token,
            },
            EntityVerificationResult::NotFound(not_found) => Self {
                identifier: not_found.identifier,
                entity: None,
                state: TrackState::NonExistent,
                original_concurrency_token: ConcurrencyToken::any(),
            },
            EntityVerificationResult::VerificationFailed { identifier, reason } => {
                panic!("cannot track a verification failure for {identifier}: {reason}")
            }
        }
    }

    pub fn identifier(&self) -> &EntityIdentifier {
        &self.identifier
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    /// `Unchanged` and `NonExistent` are both "nothing to commit" -- a bare
    /// load, found or not, is never dirty on its own.
    pub fn is_dirty(&self) -> bool {
        !matches!(self.state, TrackState::Unchanged | TrackState::NonExistent)
    }

    pub fn entity(&self) -> Option<&E> {
        self.entity.as_ref()
    }

    /// Access for applying a mutation; promotes `Unchanged` to `Modified`.
    /// Has no effect on `New`, which is already due to be persisted, or on
    /// `NonExistent`, which holds no entity to mutate in the first place.
    pub fn entity_mut(&mut self) -> Option<&mut E> {
        if self.state == TrackState::Unchanged {
            self.state = TrackState::Modified;
        }
        self.entity.as_mut()
    }

    /// Installs a freshly created entity into a tracked slot that previously
    /// held nothing (the result of tracking a `NotFound` query result),
    /// promoting it from `NonExistent` to `New`.
    pub fn install(&mut self, entity: E) {
        self.entity = Some(entity);
        self.state = TrackState::New;
    }

    /// Replaces the tracked value wholesale, used by
    /// [`crate::entity::storage::EntityStorage::store`]'s `RecordCreateOrUpdate`
    /// on an identifier already tracked this unit of work. Promotes
    /// `Unchanged` to `Modified` and `NonExistent` to `New`, same rule
    /// [`Self::entity_mut`]/[`Self::install`] apply; leaves `New` and
    /// `Modified` as they are.
    pub fn replace(&mut self, entity: E) {
        self.state = match self.state {
            TrackState::Unchanged => TrackState::Modified,
            TrackState::NonExistent => TrackState::New,
            other => other,
        };
        self.entity = Some(entity);
    }

    /// Stages the tracked entity for deletion (spec §4.G's `RecordDelete`).
    pub fn mark_removed(&mut self) {
        self.state = TrackState::Removed;
    }

    pub fn original_concurrency_token(&self) -> &ConcurrencyToken {
        &self.original_concurrency_token
    }

    /// Called after a successful commit: adopts the token the storage
    /// engine assigned and returns to `Unchanged`, ready to be mutated again
    /// within the same unit of work.
    pub fn mark_clean(&mut self, token: ConcurrencyToken) {
        self.original_concurrency_token = token.clone();
        if let Some(entity) = self.entity.as_mut() {
            entity.set_concurrency_token(token);
        }
        self.state = TrackState::Unchanged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::event::DomainEventCollection;

    #[derive(Default)]
    struct Widget {
        id: String,
        revision: u64,
        token: ConcurrencyToken,
        pending: DomainEventCollection,
    }

    impl Entity for Widget {
        fn entity_type(&self) -> &'static str {
            "widget"
        }
        fn entity_id(&self) -> String {
            self.id.clone()
        }
        fn revision(&self) -> u64 {
            self.revision
        }
        fn concurrency_token(&self) -> ConcurrencyToken {
            self.token.clone()
        }
        fn set_concurrency_token(&mut self, token: ConcurrencyToken) {
            self.token = token;
        }
        fn uncommitted_events(&self) -> &DomainEventCollection {
            &self.pending
        }
        fn uncommitted_events_mut(&mut self) -> &mut DomainEventCollection {
            &mut self.pending
        }
        fn set_revision(&mut self, revision: u64) {
            self.revision = revision;
        }
    }

    #[test]
    fn mutating_an_unchanged_entity_marks_it_modified() {
        let mut tracked = TrackedEntity::new(EntityIdentifier::new("widget", "1"), Widget::default());
        assert_eq!(tracked.state(), TrackState::New);

        // Simulate a reload landing it in Unchanged state.
        let tracked_reloaded = TrackedEntity {
            state: TrackState::Unchanged,
            ..tracked
        };
        tracked = tracked_reloaded;

        tracked.entity_mut();
        assert_eq!(tracked.state(), TrackState::Modified);
    }

    #[test]
    fn a_not_found_load_result_tracks_as_non_existent_and_is_not_dirty() {
        let tracked: TrackedEntity<Widget> =
            TrackedEntity::from_load_result(EntityVerificationResult::NotFound(
                crate::entity::load::NotFoundEntityQueryResult {
                    identifier: EntityIdentifier::new("widget", "1"),
                    loaded_from_cache: false,
                },
            ));

        assert_eq!(tracked.state(), TrackState::NonExistent);
        assert!(!tracked.is_dirty());
        assert!(tracked.entity().is_none());
    }

    #[test]
    fn installing_over_a_non_existent_entity_promotes_it_to_new() {
        let mut tracked: TrackedEntity<Widget> =
            TrackedEntity::from_load_result(EntityVerificationResult::NotFound(
                crate::entity::load::NotFoundEntityQueryResult {
                    identifier: EntityIdentifier::new("widget", "1"),
                    loaded_from_cache: false,
                },
            ));

        tracked.install(Widget {
            id: "1".into(),
            ..Default::default()
        });

        assert_eq!(tracked.state(), TrackState::New);
        assert!(tracked.is_dirty());
    }
}
