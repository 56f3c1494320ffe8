//! Derives the ordered route hierarchy used to look up handler
//! registrations for a message.

use std::fmt;

use crate::message::{Headers, Message, MessageType};

/// A hierarchical key derived from a message type. Routes form a hierarchy
/// reflecting the "class hierarchy" of message types: a base route matches
/// derived routes when route-descend is allowed (see [`crate::dispatch::Dispatcher`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route(String);

impl Route {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<MessageType> for Route {
    fn from(t: MessageType) -> Self {
        Route(t.name().to_owned())
    }
}

impl From<&str> for Route {
    fn from(s: &str) -> Self {
        Route(s.to_owned())
    }
}

/// Type-erased view over a [`crate::message::DispatchData`], exposing just
/// what the route resolver and handler registry need, without requiring
/// either to be generic over the message payload type.
pub trait Routable {
    fn message_type(&self) -> MessageType;

    /// The message's own route hierarchy, most-derived first. The default
    /// [`Message::route_hierarchy`] implementation returns a single-element
    /// hierarchy (no base routes); messages that model an inheritance-like
    /// relationship override it to report their base routes too, in
    /// most-derived-to-least-derived order, terminated before any interface
    /// / marker-trait-only route.
    fn route_hierarchy(&self) -> Vec<Route>;

    fn headers(&self) -> &Headers;
}

impl<T> Routable for crate::message::DispatchData<T>
where
    T: Message,
{
    fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    fn route_hierarchy(&self) -> Vec<Route> {
        self.message.route_hierarchy()
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// Resolves the route hierarchy for a message. Custom resolvers may
/// substitute an arbitrary hierarchy (e.g. tag-based routing); when multiple
/// resolvers are configured, the first one that returns `Some` wins.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, message: &dyn Routable) -> Option<Vec<Route>>;
}

/// Fallback resolver used when no configured [`RouteResolver`] claims a
/// message: returns the message's own declared route hierarchy unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRouteResolver;

impl RouteResolver for DefaultRouteResolver {
    fn resolve(&self, message: &dyn Routable) -> Option<Vec<Route>> {
        Some(message.route_hierarchy())
    }
}

/// Runs an ordered list of [`RouteResolver`]s, falling back to
/// [`DefaultRouteResolver`] if none of them claim the message.
pub(crate) fn resolve_hierarchy(
    resolvers: &[std::sync::Arc<dyn RouteResolver>],
    message: &dyn Routable,
) -> Vec<Route> {
    resolvers
        .iter()
        .find_map(|resolver| resolver.resolve(message))
        .unwrap_or_else(|| DefaultRouteResolver.resolve(message).unwrap())
}
