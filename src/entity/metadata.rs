//! The `Entity` trait: how the storage engine reads and updates an
//! application aggregate's identity, revision, concurrency token, and
//! pending domain events.
//!
//! A reflection-based accessor has to reject whole categories of candidate
//! types at runtime (delegates, value types, interfaces, open generics) before
//! it can even attempt to read an id or version off them. A trait bound does
//! the same job at compile time: only a concrete, `Sized` type can implement
//! [`Entity`], so none of those categories ever reach [`crate::entity::storage`]
//! or [`crate::entity::commit`] in the first place.

use crate::entity::event::{DomainEvent, DomainEventCollection};
use crate::entity::identifier::{ConcurrencyToken, EntityIdentifier};

/// Implemented by application aggregate types to participate in entity
/// storage. `revision` and `concurrency_token` are tracked independently:
/// revision is a monotonic count of applied events used for ordering and
/// diagnostics, while the concurrency token is whatever opaque value the
/// backing [`crate::entity::engine::RecordStore`] uses for its compare-and-swap.
pub trait Entity: Send + Sync {
    fn entity_type(&self) -> &'static str;
    fn entity_id(&self) -> String;
    fn revision(&self) -> u64;
    fn concurrency_token(&self) -> ConcurrencyToken;
    fn set_concurrency_token(&mut self, token: ConcurrencyToken);

    fn uncommitted_events(&self) -> &DomainEventCollection;
    fn uncommitted_events_mut(&mut self) -> &mut DomainEventCollection;
    fn set_revision(&mut self, revision: u64);

    fn identifier(&self) -> EntityIdentifier {
        EntityIdentifier::new(self.entity_type(), self.entity_id())
    }

    /// Stages `event` for the next commit. Revision does not advance here --
    /// a commit always advances revision by exactly one, regardless of how
    /// many events it raised; see [`Entity::commit_events`].
    fn add_event(&mut self, event: DomainEvent) {
        self.uncommitted_events_mut().push(event);
    }

    /// Drains the pending event collection without touching revision --
    /// [`crate::entity::commit`] stamps the new revision itself (always
    /// `expected_revision + 1`, whether or not any events were raised) once
    /// the drained events are folded into the commit attempt. Called by
    /// [`crate::entity::commit`]; never by application code directly.
    fn commit_events(&mut self) -> Vec<DomainEvent> {
        let drained: Vec<DomainEvent> = self.uncommitted_events().iter().cloned().collect();
        self.uncommitted_events_mut().clear();
        drained
    }
}
