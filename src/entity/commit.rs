//! Builds a [`CommitAttempt`] from a unit of work's dirty entities, runs it
//! through the commit-processor pipeline and the storage engine, and
//! reconciles the outcome back into tracked state.

use std::sync::Arc;

use serde::Serialize;

use crate::dispatch::result::{DispatchResult, ResultValue};
use crate::entity::engine::{CommitAttempt, CommitAttemptEntry, CommitError, CommittedEntry, RecordStore};
use crate::entity::event::{DomainEvent, DomainEventDispatcher};
use crate::entity::identifier::EntityIdentifier;
use crate::entity::metadata::Entity;
use crate::entity::storage::EntityStorage;
use crate::entity::tracked::TrackState;
use crate::pipeline::Chain;

/// Context threaded through the commit-processor pipeline.
pub struct CommitContext {
    pub attempt: CommitAttempt,
}

/// Builds a commit attempt from every dirty entity in `storage`, runs it
/// through `chain` (terminating in the storage engine's
/// [`RecordStore::process_commit_attempt`]), and on success reconciles
/// tracked state and publishes the entities' domain events.
///
/// Returns [`DispatchResult::success`] with nothing to persist if `storage`
/// has no dirty entities -- the pipeline and storage engine are not invoked.
#[cfg_attr(feature = "tracing", tracing::instrument(skip(storage, store, chain, event_dispatcher)))]
pub async fn commit<E>(
    storage: &mut EntityStorage<E>,
    store: &Arc<dyn RecordStore>,
    chain: &Chain<CommitContext>,
    event_dispatcher: Option<&Arc<dyn DomainEventDispatcher>>,
) -> DispatchResult
where
    E: Entity + Serialize,
{
    let dirty_ids = storage.dirty_identifiers();
    if dirty_ids.is_empty() {
        return DispatchResult::success();
    }

    let mut entries = Vec::with_capacity(dirty_ids.len());
    let mut events_by_entity: Vec<(EntityIdentifier, Vec<DomainEvent>)> = Vec::new();

    for id in &dirty_ids {
        let tracked = storage
            .try_get_tracked_mut(id)
            .expect("identifier was just listed as dirty");

        let entry = if tracked.state() == TrackState::Removed {
            let expected = tracked.original_concurrency_token().clone();
            let next_revision = tracked.entity().map(Entity::revision).unwrap_or_default() + 1;
            CommitAttemptEntry {
                identifier: id.clone(),
                expected_concurrency_token: expected,
                revision: next_revision,
                payload: None,
                events: Vec::new(),
            }
        } else {
            let expected = tracked.original_concurrency_token().clone();
            let entity = tracked
                .entity_mut()
                .expect("new or modified tracked entity always holds a value");
            let next_revision = entity.revision() + 1;
            let events = entity.commit_events();
            // A commit always advances revision by exactly one, whether or
            // not it raised any events -- §4.H's `revision = expectedRevision
            // + 1` applies uniformly to Store and Delete alike.
            entity.set_revision(next_revision);

            let payload = match serde_json::to_vec(&*entity) {
                Ok(bytes) => bytes,
                Err(err) => return DispatchResult::failure(format!("failed to encode entity {id}: {err}")),
            };

            events_by_entity.push((id.clone(), events.clone()));

            CommitAttemptEntry {
                identifier: id.clone(),
                expected_concurrency_token: expected,
                revision: next_revision,
                payload: Some(payload),
                events,
            }
        };

        entries.push(entry);
    }

    let attempt = CommitAttempt { entries };
    let ctx = CommitContext { attempt };
    let store = store.clone();

    let (result, _ctx) = chain
        .run(ctx, move |ctx| {
            let store = store.clone();
            Box::pin(async move {
                let outcome = match store.process_commit_attempt(&ctx.attempt).await {
                    Ok(committed) => DispatchResult::success_with(committed),
                    Err(CommitError::ConcurrencyConflict(conflicts)) => DispatchResult::concurrency_issue()
                        .with_result_data("conflicts", ResultValue::Integer(conflicts.len() as i64)),
                    Err(CommitError::Backend(message)) => DispatchResult::failure(message),
                };
                (outcome, ctx)
            })
        })
        .await;

    if !result.is_success() {
        return result;
    }

    let Some(committed) = result.success_value::<Vec<CommittedEntry>>() else {
        return result;
    };

    for entry in committed {
        let Some(tracked) = storage.try_get_tracked_mut(&entry.identifier) else {
            continue;
        };

        if tracked.state() == TrackState::Removed {
            storage.forget(&entry.identifier);
            continue;
        }

        tracked.mark_clean(entry.new_concurrency_token.clone());
    }

    if let Some(dispatcher) = event_dispatcher {
        for (identifier, events) in &events_by_entity {
            if events.is_empty() {
                continue;
            }
            let publish_result = dispatcher.dispatch(identifier, events).await;
            if !publish_result.is_success() {
                // The commit itself already succeeded; there is no
                // well-defined way to "unpersist" a durable write, so a
                // publish failure is logged and otherwise swallowed rather
                // than reported back as part of the commit's own outcome.
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    identifier = %identifier,
                    "domain event publication failed after commit"
                );
            }
        }
    }

    result
}
