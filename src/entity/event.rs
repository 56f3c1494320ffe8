//! Domain events recorded by an entity and published after a successful
//! commit.

use async_trait::async_trait;

use crate::dispatch::result::DispatchResult;
use crate::entity::identifier::EntityIdentifier;
use crate::message::MessageType;

/// One domain event raised by an entity, in the wire form a
/// [`crate::entity::engine::RecordStore`] persists it in. Events are
/// serialized at the point they're recorded (see
/// [`crate::entity::metadata`]) rather than carried as live `dyn Message`
/// values, so a [`DomainEventCollection`] can use ordinary structural
/// equality for its dedup rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainEvent {
    pub event_type: MessageType,
    pub payload: Vec<u8>,
}

impl DomainEvent {
    pub fn new(event_type: MessageType, payload: Vec<u8>) -> Self {
        Self { event_type, payload }
    }
}

/// An entity's uncommitted (or just-committed) domain events. Insertion is
/// idempotent -- pushing an event already present is a no-op -- and equality
/// between two collections ignores order, since the original notion is "the
/// same set of things happened", not "in this exact sequence".
#[derive(Debug, Clone, Default)]
pub struct DomainEventCollection {
    events: Vec<DomainEvent>,
}

impl DomainEventCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `event` unless an equal one is already present. Returns
    /// whether it was actually added.
    pub fn push(&mut self, event: DomainEvent) -> bool {
        if self.events.contains(&event) {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &DomainEvent> {
        self.events.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn into_vec(self) -> Vec<DomainEvent> {
        self.events
    }
}

impl PartialEq for DomainEventCollection {
    fn eq(&self, other: &Self) -> bool {
        self.events.len() == other.events.len() && self.events.iter().all(|e| other.events.contains(e))
    }
}

impl Eq for DomainEventCollection {}

impl FromIterator<DomainEvent> for DomainEventCollection {
    fn from_iter<I: IntoIterator<Item = DomainEvent>>(iter: I) -> Self {
        let mut collection = Self::new();
        for event in iter {
            collection.push(event);
        }
        collection
    }
}

/// Publishes an entity's domain events once its commit attempt has been
/// durably persisted. Typically backed by the same [`crate::dispatch::Dispatcher`]
/// handling in-process messages, in publish mode.
#[async_trait]
pub trait DomainEventDispatcher: Send + Sync {
    async fn dispatch(&self, entity: &EntityIdentifier, events: &[DomainEvent]) -> DispatchResult;
}
