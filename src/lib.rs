//! In-process and cross-node message dispatcher with domain-driven aggregate
//! storage.
//!
//! Application code submits typed request, command, and event messages
//! through a [`dispatch::Dispatcher`], which routes each to zero or more
//! registered handlers -- locally, or across a network of peer endpoints --
//! and aggregates their results into a single [`dispatch::DispatchResult`].
//! Handlers mutate domain entities through an [`entity::storage::EntityStorage`]
//! unit of work, which commits tracked changes and the domain events they
//! raised atomically, guarded by an optimistic-concurrency token.
//!
//! The two halves of the crate -- [`dispatch`] and [`entity`] -- share the
//! generic "around" middleware chain in [`pipeline`] and the endpoint/scope
//! model in [`scope`]. Neither half knows about wire formats, transports, or
//! storage backends directly: those are traits in [`scope`] and
//! [`entity::engine`] that a host application (or the companion
//! `nexus-memory` crate, for tests and single-process use) implements.
//!
//! ```
//! use nexus::dispatch::{Config, Dispatcher, Handler, HandlerConfig, HandlerContext, HandlerRegistration};
//! use nexus::dispatch::{DispatchResult, HandlerRegistry};
//! use nexus::message::{DispatchData, Message, MessageType};
//! use nexus::scope::EndpointId;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Clone, PartialEq, Eq, Debug)]
//! struct Ping;
//!
//! impl Message for Ping {
//!     fn message_type(&self) -> MessageType {
//!         MessageType::of::<Ping>()
//!     }
//! }
//!
//! struct Pong;
//!
//! #[async_trait::async_trait]
//! impl Handler<Ping> for Pong {
//!     async fn handle(&self, _msg: DispatchData<Ping>, _ctx: &mut HandlerContext) -> DispatchResult {
//!         DispatchResult::success()
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Arc::new(HandlerRegistry::new());
//! registry.register(HandlerRegistration::new::<Ping, Pong>(HandlerConfig::default(), |_| Pong));
//!
//! let dispatcher = Dispatcher::new(Config::new(EndpointId::new("local"), registry));
//! dispatcher.initialize().await.unwrap();
//!
//! let result = dispatcher
//!     .dispatch(DispatchData::new(Ping), false, CancellationToken::new())
//!     .await
//!     .unwrap();
//! assert!(result.is_success());
//! # }
//! ```

pub mod dispatch;
pub mod entity;
pub mod message;
pub mod pipeline;
pub mod scope;

pub use dispatch::{DispatchResult, Dispatcher};
pub use entity::storage::EntityStorage;
pub use message::{DispatchData, Message, MessageType};
