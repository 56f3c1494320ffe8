//! Messages are the unit of data the dispatcher routes. A [`Message`] only
//! needs a runtime type tag; the dispatcher never inspects its payload.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque value attached to a [`DispatchData`] header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    String(String),
    Integer(i64),
    Bool(bool),
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::String(v)
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::String(v.to_owned())
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Integer(v)
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        HeaderValue::Bool(v)
    }
}

/// Header map carried alongside a message, keyed by string.
pub type Headers = HashMap<String, HeaderValue>;

/// A runtime type tag for a message, used by the route resolver and the
/// handler registry to key lookups. Two messages with the same
/// [`MessageType::name`] and [`MessageType::id`] are considered the same
/// type for routing purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The unqualified, human-readable name of the message type. Used by the
    /// "same-context" optimization and by remote-routing diagnostics; it is
    /// not guaranteed unique across crates, unlike [`MessageType::id`].
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[doc(hidden)]
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An opaque message value: a payload plus its runtime type tag. Carried
/// inside a [`DispatchData`] envelope through the dispatcher, without ever
/// being inspected structurally.
pub trait Message: AsAny + Send + Sync {
    /// Domain name of the message, ideally unique within the application.
    fn message_type(&self) -> MessageType;

    /// Own route first, then base-type routes in most-derived-to-least-
    /// derived order. The default implementation reports a single-element
    /// hierarchy (no base routes); override it for messages that model an
    /// inheritance-like relationship to another message type.
    fn route_hierarchy(&self) -> Vec<crate::dispatch::route::Route> {
        vec![self.message_type().into()]
    }
}

/// A [`Message`] plus the headers the routing layer passes alongside it.
///
/// `DispatchData<T>` is the statically-typed variant used by application
/// code; the dispatcher itself only ever needs the type-erased payload and
/// headers, which is why [`DispatchData::message_type`] is available without
/// downcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchData<T> {
    pub message: T,
    pub headers: Headers,
}

impl<T> DispatchData<T> {
    pub fn new(message: T) -> Self {
        Self {
            message,
            headers: Headers::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&HeaderValue> {
        self.headers.get(key)
    }
}

impl<T> From<T> for DispatchData<T> {
    fn from(message: T) -> Self {
        Self::new(message)
    }
}

impl dyn Message {
    /// Attempts to recover the concrete message type behind a type-erased
    /// `dyn Message`, e.g. after a [`crate::scope::MessageSerializer`]
    /// deserializes a remote payload.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl<T> PartialEq for DispatchData<T>
where
    T: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Ping;

    impl Message for Ping {
        fn message_type(&self) -> MessageType {
            MessageType::of::<Ping>()
        }
    }

    #[test]
    fn headers_do_not_affect_equality() {
        let a = DispatchData::new(Ping);
        let b = DispatchData::new(Ping).with_header("trace-id", "abc");

        assert_eq!(a, b);
    }

    #[test]
    fn message_type_is_stable_for_same_type() {
        assert_eq!(MessageType::of::<Ping>(), MessageType::of::<Ping>());
    }
}
