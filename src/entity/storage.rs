//! The identity map a unit of work uses to avoid loading the same entity
//! twice and to know, come commit time, exactly what changed.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;

use crate::entity::engine::{QueriedRecord, Record, RecordStore, StorageError};
use crate::entity::identifier::EntityIdentifier;
use crate::entity::load::{EntityVerificationResult, FoundEntityQueryResult, NotFoundEntityQueryResult};
use crate::entity::metadata::Entity;
use crate::entity::tracked::TrackedEntity;

/// Tracks every entity touched during a unit of work. Entities are keyed by
/// identity, so a second load of the same entity returns the same tracked
/// instance rather than a fresh copy -- mutations made through one handle
/// are visible through any other handle for the same identifier.
pub struct EntityStorage<E> {
    tracked: HashMap<EntityIdentifier, TrackedEntity<E>>,
    /// First-touched order. [`Self::modified`] replays this order rather
    /// than the hash map's, so a commit attempt's entries are deterministic
    /// and match the sequence the application actually touched entities in.
    touch_order: Vec<EntityIdentifier>,
}

impl<E> Default for EntityStorage<E> {
    fn default() -> Self {
        Self {
            tracked: HashMap::new(),
            touch_order: Vec::new(),
        }
    }
}

impl<E> EntityStorage<E>
where
    E: Entity,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_get_tracked(&self, id: &EntityIdentifier) -> Option<&TrackedEntity<E>> {
        self.tracked.get(id)
    }

    pub fn try_get_tracked_mut(&mut self, id: &EntityIdentifier) -> Option<&mut TrackedEntity<E>> {
        self.tracked.get_mut(id)
    }

    /// Returns the entity already tracked under `tracked.identifier()`, or
    /// starts tracking `tracked` and returns that. Use after a storage-engine
    /// load, so a repeated load for the same identifier within one unit of
    /// work doesn't clobber in-flight mutations.
    pub fn get_or_insert(&mut self, tracked: TrackedEntity<E>) -> &mut TrackedEntity<E> {
        let id = tracked.identifier().clone();
        if let std::collections::hash_map::Entry::Vacant(slot) = self.tracked.entry(id.clone()) {
            slot.insert(tracked);
            self.touch_order.push(id.clone());
        }
        self.tracked
            .get_mut(&id)
            .expect("entry inserted or already present")
    }

    /// Drops every tracked entity, discarding in-progress mutations. Used
    /// after a successful commit (the unit of work is done) or to abandon
    /// one after a concurrency conflict the caller intends to retry fresh.
    /// Plays the role spec §6 names `entityStorage.rollback(ct)`: afterward
    /// `self.modified()` is always empty, per §8's `uow.rollback()` property.
    pub fn reset(&mut self) {
        self.tracked.clear();
        self.touch_order.clear();
    }

    /// Dirty entities (`New`, `Modified`, or `Removed`), in first-touched
    /// order.
    pub fn modified(&self) -> Vec<&TrackedEntity<E>> {
        self.touch_order
            .iter()
            .filter_map(|id| self.tracked.get(id))
            .filter(|tracked| tracked.is_dirty())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Dirty entities' identifiers, in first-touched order. Stable to
    /// iterate over while mutating individual entries with
    /// [`Self::try_get_tracked_mut`], unlike [`Self::modified`].
    pub fn dirty_identifiers(&self) -> Vec<EntityIdentifier> {
        self.touch_order
            .iter()
            .filter(|id| self.tracked.get(*id).is_some_and(TrackedEntity::is_dirty))
            .cloned()
            .collect()
    }

    /// Drops a `Removed` entity entirely once its commit has persisted.
    pub fn forget(&mut self, id: &EntityIdentifier) {
        self.tracked.remove(id);
        self.touch_order.retain(|tracked_id| tracked_id != id);
    }

    /// Records a create-or-update for `entity` (spec §4.G's
    /// `RecordCreateOrUpdate`, surfaced at the external boundary as
    /// `entityStorage.store(descriptor, ct)`, spec §6). If this unit of work
    /// is already tracking `entity`'s identifier -- typically because it was
    /// loaded first -- the tracked value is replaced in place and marked
    /// dirty; otherwise a brand-new `TrackState::New` entry starts tracking
    /// it.
    pub fn store(&mut self, entity: E) -> &mut TrackedEntity<E> {
        let id = entity.identifier();
        if self.tracked.contains_key(&id) {
            let tracked = self.tracked.get_mut(&id).expect("just checked contains_key");
            tracked.replace(entity);
            tracked
        } else {
            self.get_or_insert(TrackedEntity::new(id, entity))
        }
    }

    /// Records a deletion for the entity tracked at `identifier` (spec
    /// §4.G's `RecordDelete`, surfaced at the external boundary as
    /// `entityStorage.delete(descriptor, ct)`, spec §6). `identifier` must
    /// already be tracked in this unit of work -- typically via
    /// [`Self::load`] -- since there is nothing meaningful to delete
    /// otherwise; returns `None` in that case rather than fabricating an
    /// entry.
    pub fn delete(&mut self, identifier: &EntityIdentifier) -> Option<&mut TrackedEntity<E>> {
        let tracked = self.tracked.get_mut(identifier)?;
        tracked.mark_removed();
        Some(tracked)
    }
}

impl<E> EntityStorage<E>
where
    E: Entity + DeserializeOwned,
{
    /// Loads `identifier` from `store` and starts tracking it, or returns
    /// the already-tracked entity if this unit of work touched it before --
    /// the identity-map guarantee from spec §4.G: a second load for the same
    /// identifier never clobbers in-flight mutations. Equivalent to
    /// `self.load_with(identifier, store, false)`.
    pub async fn load(
        &mut self,
        identifier: EntityIdentifier,
        store: &Arc<dyn RecordStore>,
    ) -> Result<&TrackedEntity<E>, StorageError> {
        self.load_with(identifier, store, false).await
    }

    /// Like [`Self::load`], but always goes to `store`'s backing storage
    /// rather than any cache it maintains -- spec's `bypassCache` query
    /// parameter.
    pub async fn load_bypassing_cache(
        &mut self,
        identifier: EntityIdentifier,
        store: &Arc<dyn RecordStore>,
    ) -> Result<&TrackedEntity<E>, StorageError> {
        self.load_with(identifier, store, true).await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, store)))]
    async fn load_with(
        &mut self,
        identifier: EntityIdentifier,
        store: &Arc<dyn RecordStore>,
        bypass_cache: bool,
    ) -> Result<&TrackedEntity<E>, StorageError> {
        if self.tracked.contains_key(&identifier) {
            return Ok(self
                .try_get_tracked(&identifier)
                .expect("just checked it's present"));
        }

        let result = query_one(store, &identifier, bypass_cache).await?;
        let tracked = result
            .into_tracked()
            .unwrap_or_else(|| panic!("verification failure tracked as a load result: {identifier}"));
        Ok(self.get_or_insert(tracked))
    }
}

/// Queries a single entity by identifier and decodes its payload into `E`.
/// A payload that fails to decode surfaces as
/// [`EntityVerificationResult::VerificationFailed`] rather than a hard
/// error -- the record exists, but this storage engine can't vouch for its
/// shape, which is exactly what that variant means.
#[cfg_attr(feature = "tracing", tracing::instrument(skip(store)))]
pub async fn query_one<E>(
    store: &Arc<dyn RecordStore>,
    identifier: &EntityIdentifier,
    bypass_cache: bool,
) -> Result<EntityVerificationResult<E>, StorageError>
where
    E: Entity + DeserializeOwned,
{
    Ok(match store.query_entity(identifier, bypass_cache).await? {
        Some(queried) => decode_found(identifier, queried),
        None => EntityVerificationResult::NotFound(NotFoundEntityQueryResult {
            identifier: identifier.clone(),
            loaded_from_cache: false,
        }),
    })
}

/// A lazy sequence of every currently-stored entity of type `entity_type`,
/// decoded into `E`. Mirrors `entityStorage.loadEntities(type, ct)` from
/// spec §6: each item is produced as the underlying
/// [`RecordStore::query_entities_by_type`] stream yields it, so a caller can
/// stop consuming early without paying for records it never asked to see.
pub fn load_entities<E>(
    store: Arc<dyn RecordStore>,
    entity_type: &'static str,
) -> BoxStream<'static, Result<FoundEntityQueryResult<E>, StorageError>>
where
    E: Entity + DeserializeOwned + 'static,
{
    store
        .query_entities_by_type(entity_type)
        .map(move |record| {
            let record = record?;
            let identifier = record.identifier.clone();
            let queried = QueriedRecord {
                record,
                loaded_from_cache: false,
            };
            match decode_found(&identifier, queried) {
                EntityVerificationResult::Found(found) => Ok(found),
                EntityVerificationResult::VerificationFailed { reason, .. } => {
                    Err(StorageError::Backend(reason))
                }
                EntityVerificationResult::NotFound(_) => {
                    unreachable!("decode_found never returns NotFound for a present record")
                }
            }
        })
        .boxed()
}

fn decode_found<E>(identifier: &EntityIdentifier, queried: QueriedRecord) -> EntityVerificationResult<E>
where
    E: Entity + DeserializeOwned,
{
    let QueriedRecord { record, loaded_from_cache } = queried;
    match serde_json::from_slice::<E>(&record.payload) {
        Ok(mut entity) => {
            entity.set_revision(record.revision);
            entity.set_concurrency_token(record.concurrency_token.clone());
            EntityVerificationResult::Found(FoundEntityQueryResult {
                identifier: identifier.clone(),
                entity,
                concurrency_token: record.concurrency_token,
                revision: record.revision,
                loaded_from_cache,
            })
        }
        Err(err) => EntityVerificationResult::VerificationFailed {
            identifier: identifier.clone(),
            reason: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::event::DomainEventCollection;
    use crate::entity::identifier::ConcurrencyToken;

    #[derive(Default, Clone)]
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
    fn second_insert_for_the_same_identity_returns_the_first_instance() {
        let mut storage: EntityStorage<Widget> = EntityStorage::new();
        let id = EntityIdentifier::new("widget", "1");

        storage.get_or_insert(TrackedEntity::new(id.clone(), Widget {
            id: "1".into(),
            ..Default::default()
        }));
        storage
            .try_get_tracked_mut(&id)
            .unwrap()
            .entity_mut()
            .unwrap()
            .revision = 7;

        storage.get_or_insert(TrackedEntity::new(id.clone(), Widget::default()));

        assert_eq!(storage.try_get_tracked(&id).unwrap().entity().unwrap().revision, 7);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn modified_preserves_first_touched_order() {
        let mut storage: EntityStorage<Widget> = EntityStorage::new();
        let a = EntityIdentifier::new("widget", "a");
        let b = EntityIdentifier::new("widget", "b");

        storage.get_or_insert(TrackedEntity::new(b.clone(), Widget {
            id: "b".into(),
            ..Default::default()
        }));
        storage.get_or_insert(TrackedEntity::new(a.clone(), Widget {
            id: "a".into(),
            ..Default::default()
        }));

        let ids: Vec<_> = storage.modified().into_iter().map(|t| t.identifier().clone()).collect();
        assert_eq!(ids, vec![b, a]);
    }
}
