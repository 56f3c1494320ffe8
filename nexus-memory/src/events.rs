//! [`DomainEventDispatcher`] implementations: one that just records what it
//! was asked to publish, for assertions in tests; one that actually
//! re-enters a [`Dispatcher`] in publish mode, the way a durable outbox
//! would after a commit lands.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use nexus::dispatch::{DispatchResult, Dispatcher};
use nexus::entity::{DomainEvent, DomainEventDispatcher, EntityIdentifier};
use nexus::message::Headers;
use nexus::scope::MessageSerializer;

/// Records every `dispatch` call. Always reports success; a test inspects
/// [`Self::published`] to assert on what was recorded.
#[derive(Default)]
pub struct RecordingEventDispatcher {
    published: RwLock<Vec<(EntityIdentifier, Vec<DomainEvent>)>>,
}

impl RecordingEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(EntityIdentifier, Vec<DomainEvent>)> {
        self.published
            .read()
            .expect("recording dispatcher lock poisoned")
            .clone()
    }
}

#[async_trait]
impl DomainEventDispatcher for RecordingEventDispatcher {
    async fn dispatch(&self, entity: &EntityIdentifier, events: &[DomainEvent]) -> DispatchResult {
        self.published
            .write()
            .expect("recording dispatcher lock poisoned")
            .push((entity.clone(), events.to_vec()));
        DispatchResult::success()
    }
}

/// Publishes an entity's domain events by decoding each one back into a
/// message and re-entering `dispatcher` in publish mode. Decoding uses the
/// same [`MessageSerializer`] the dispatcher uses for remote routing, so a
/// domain event type only needs registering once.
pub struct DispatchingEventDispatcher {
    dispatcher: Arc<Dispatcher>,
    serializer: Arc<dyn MessageSerializer>,
}

impl DispatchingEventDispatcher {
    pub fn new(dispatcher: Arc<Dispatcher>, serializer: Arc<dyn MessageSerializer>) -> Self {
        Self { dispatcher, serializer }
    }
}

#[async_trait]
impl DomainEventDispatcher for DispatchingEventDispatcher {
    async fn dispatch(&self, _entity: &EntityIdentifier, events: &[DomainEvent]) -> DispatchResult {
        let mut results = Vec::with_capacity(events.len());

        for event in events {
            let message = match self.serializer.deserialize(event.event_type, &event.payload) {
                Ok(message) => message,
                Err(err) => {
                    results.push(DispatchResult::failure(format!(
                        "failed to decode domain event {}: {err}",
                        event.event_type
                    )));
                    continue;
                }
            };

            let outcome = match self
                .dispatcher
                .dispatch_remote_payload(message, Headers::new(), true, CancellationToken::new())
                .await
            {
                Ok(result) => result,
                Err(err) => DispatchResult::failure(format!(
                    "failed to publish domain event {}: {err}",
                    event.event_type
                )),
            };
            results.push(outcome);
        }

        DispatchResult::aggregate_or_single(results)
    }
}
