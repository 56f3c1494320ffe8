//! In-memory backends for every external trait boundary `nexus` defines:
//! [`store::InMemoryRecordStore`] for `nexus::entity::RecordStore`,
//! [`cache::CachingRecordStore`] layering a TTL cache over any `RecordStore`,
//! [`transport::LoopbackRouteTransport`] for `nexus::scope::RouteTransport`,
//! [`serializer::JsonMessageSerializer`] for `nexus::scope::MessageSerializer`
//! and `nexus::scope::TypeResolver`, and two `nexus::entity::DomainEventDispatcher`
//! implementations in [`events`]. Meant for tests and local development, not
//! as a production storage engine.

pub mod cache;
pub mod events;
pub mod serializer;
pub mod store;
pub mod transport;

pub use cache::CachingRecordStore;
pub use events::{DispatchingEventDispatcher, RecordingEventDispatcher};
pub use serializer::JsonMessageSerializer;
pub use store::InMemoryRecordStore;
pub use transport::LoopbackRouteTransport;
