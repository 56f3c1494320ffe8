//! Endpoint/cluster identity, the service-scope hook into an application's
//! DI container, and the traits a host application implements to wire the
//! dispatcher to a concrete transport and wire format.

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::dispatch::result::DispatchResult;
use crate::dispatch::route::Route;
use crate::message::{Message, MessageType};

/// Identifies a single running instance of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a group of endpoints that share message routes, e.g. replicas
/// of the same service behind a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a route was last seen: a specific endpoint, or anywhere in a
/// cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub endpoint: EndpointId,
    pub cluster: Option<ClusterId>,
}

impl Scope {
    pub fn endpoint(endpoint: EndpointId) -> Self {
        Self {
            endpoint,
            cluster: None,
        }
    }

    #[must_use]
    pub fn with_cluster(mut self, cluster: ClusterId) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// A message routable to `self` can be dispatched to `target` when they
    /// name the same endpoint, or share a cluster.
    pub fn can_route_to(&self, target: &Scope) -> bool {
        self.endpoint == target.endpoint
            || matches!((&self.cluster, &target.cluster), (Some(a), Some(b)) if a == b)
    }
}

/// A narrow view into the host application's dependency-injection container:
/// resolves handler dependencies and supports creating a nested scope for
/// per-dispatch lifetimes (e.g. a request-scoped database connection).
pub trait ServiceScope: Send + Sync {
    fn service(&self, type_id: std::any::TypeId) -> Option<&(dyn Any + Send + Sync)>;

    fn create_scope(&self) -> Box<dyn ServiceScope>;
}

/// A [`ServiceScope`] with nothing in it, for handlers with no external
/// dependencies and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullServiceScope;

impl ServiceScope for NullServiceScope {
    fn service(&self, _type_id: std::any::TypeId) -> Option<&(dyn Any + Send + Sync)> {
        None
    }

    fn create_scope(&self) -> Box<dyn ServiceScope> {
        Box::new(NullServiceScope)
    }
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("no serializer registered for message type {0}")]
    UnknownType(MessageType),
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message of type {0}: {1}")]
    Decode(MessageType, String),
}

/// Converts messages and results to and from the bytes carried over a
/// [`RouteTransport`].
pub trait MessageSerializer: Send + Sync {
    fn serialize(&self, message: &dyn Message) -> Result<Vec<u8>, SerializationError>;

    fn deserialize(
        &self,
        message_type: MessageType,
        bytes: &[u8],
    ) -> Result<Box<dyn Message>, SerializationError>;

    /// Encodes a [`DispatchResult`] for the return trip of a remote dispatch.
    /// Only the variant's wire-representable fields are carried -- see
    /// [`crate::dispatch::result::WireResult`].
    fn serialize_result(&self, result: &DispatchResult) -> Result<Vec<u8>, SerializationError>;

    fn deserialize_result(&self, bytes: &[u8]) -> Result<DispatchResult, SerializationError>;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no remote endpoint is reachable for route {0}")]
    NoRoute(Route),
    #[error("transport send failed: {0}")]
    Send(String),
}

/// Announces local routes to the rest of the cluster and forwards a message
/// to whichever remote endpoint owns a route this dispatcher can't serve
/// locally. Implemented by the host application (e.g. over a message
/// broker, gossip protocol, or service mesh).
#[async_trait]
pub trait RouteTransport: Send + Sync {
    async fn announce(&self, endpoint: &Scope, routes: &[Route]) -> Result<(), TransportError>;

    /// Sends `payload` for `route` to `target`, or -- when `target` is
    /// `None` -- to whichever endpoint the transport currently believes
    /// owns that route (the "no remote scope stated" default from §4.D).
    async fn send(&self, route: &Route, target: Option<&Scope>, payload: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// Resolves a [`MessageType`] from its stable, cross-process name -- the
/// inverse of [`MessageType::name`], needed to reconstruct a concrete
/// message type on the receiving end of a [`RouteTransport`].
pub trait TypeResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<MessageType>;
}
