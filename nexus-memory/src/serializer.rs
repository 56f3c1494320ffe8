//! A JSON [`MessageSerializer`] backed by a per-type codec registry. A
//! type-erased `dyn Message` can only be encoded, and a byte slice only
//! decoded, once its concrete type is known -- so every message type that
//! may cross a [`crate::transport::LoopbackRouteTransport`] boundary has to
//! be registered up front.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;

use nexus::dispatch::{DispatchResult, WireResult};
use nexus::message::{Message, MessageType};
use nexus::scope::{MessageSerializer, SerializationError, TypeResolver};

type EncodeFn = Box<dyn Fn(&dyn Message) -> Result<Vec<u8>, SerializationError> + Send + Sync>;
type DecodeFn = Box<dyn Fn(&[u8]) -> Result<Box<dyn Message>, SerializationError> + Send + Sync>;

struct Codec {
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Encodes messages and [`DispatchResult`]s as JSON.
#[derive(Default)]
pub struct JsonMessageSerializer {
    codecs: RwLock<HashMap<MessageType, Codec>>,
    names: RwLock<HashMap<String, MessageType>>,
}

impl JsonMessageSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` with this serializer and its name with the
    /// [`TypeResolver`] lookup, so instances of `T` can cross a transport
    /// boundary.
    pub fn register<T>(&self)
    where
        T: Message + Serialize + DeserializeOwned + 'static,
    {
        let message_type = MessageType::of::<T>();

        let codec = Codec {
            encode: Box::new(move |message| {
                let typed = message
                    .downcast_ref::<T>()
                    .ok_or(SerializationError::UnknownType(message_type))?;
                serde_json::to_vec(typed).map_err(|err| SerializationError::Encode(err.to_string()))
            }),
            decode: Box::new(move |bytes| {
                serde_json::from_slice::<T>(bytes)
                    .map(|message| Box::new(message) as Box<dyn Message>)
                    .map_err(|err| SerializationError::Decode(message_type, err.to_string()))
            }),
        };

        self.codecs
            .write()
            .expect("serializer registry lock poisoned")
            .insert(message_type, codec);
        self.names
            .write()
            .expect("serializer registry lock poisoned")
            .insert(message_type.name().to_owned(), message_type);
    }
}

impl MessageSerializer for JsonMessageSerializer {
    fn serialize(&self, message: &dyn Message) -> Result<Vec<u8>, SerializationError> {
        let message_type = message.message_type();
        let codecs = self.codecs.read().expect("serializer registry lock poisoned");
        let codec = codecs
            .get(&message_type)
            .ok_or(SerializationError::UnknownType(message_type))?;
        (codec.encode)(message)
    }

    fn deserialize(&self, message_type: MessageType, bytes: &[u8]) -> Result<Box<dyn Message>, SerializationError> {
        let codecs = self.codecs.read().expect("serializer registry lock poisoned");
        let codec = codecs
            .get(&message_type)
            .ok_or(SerializationError::UnknownType(message_type))?;
        (codec.decode)(bytes)
    }

    fn serialize_result(&self, result: &DispatchResult) -> Result<Vec<u8>, SerializationError> {
        let wire = WireResult::from(result);
        serde_json::to_vec(&wire).map_err(|err| SerializationError::Encode(err.to_string()))
    }

    fn deserialize_result(&self, bytes: &[u8]) -> Result<DispatchResult, SerializationError> {
        let wire: WireResult = serde_json::from_slice(bytes)
            .map_err(|err| SerializationError::Decode(MessageType::of::<DispatchResult>(), err.to_string()))?;
        Ok(DispatchResult::from(wire))
    }
}

impl TypeResolver for JsonMessageSerializer {
    fn resolve(&self, name: &str) -> Option<MessageType> {
        self.names
            .read()
            .expect("serializer registry lock poisoned")
            .get(name)
            .copied()
    }
}
