use std::fmt::Debug;

use anyhow::{
    Error,
    Result,
};

use crate::{
    core::uri::Uri,
    message::message::Message,
};

/// The type of serializer to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SerializerType {
    /// Serializes messages to and from JavaScript Object Notation.
    Json,
    /// Serializes messages to and from the MessagePack format.
    MessagePack,
}

impl SerializerType {
    /// The sub-protocol URI used during protocol negotiation.
    pub fn uri(&self) -> Uri {
        match self {
            Self::Json => Uri::from_known("wamp.2.json"),
            Self::MessagePack => Uri::from_known("wamp.2.msgpack"),
        }
    }

    /// Whether messages travel as binary frames.
    pub fn binary(&self) -> bool {
        *self == Self::MessagePack
    }
}

impl TryFrom<&str> for SerializerType {
    type Error = &'static str;
    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value {
            "wamp.2.json" => Ok(Self::Json),
            "wamp.2.msgpack" => Ok(Self::MessagePack),
            _ => Err("unsupported serializer"),
        }
    }
}

/// A serializer, which serializes and deserializes WAMP messages to a well-known format that can be
/// passed over wire.
pub trait Serializer: Send + Debug {
    /// Serializes the given message to bytes.
    fn serialize(&self, value: &Message) -> Result<Vec<u8>>;

    /// Deserializes bytes to a message.
    fn deserialize(&self, bytes: &[u8]) -> Result<Message>;
}

/// Serializes messages in the array form shared by every WAMP format.
#[derive(Debug)]
struct FormatSerializer {
    serializer_type: SerializerType,
}

impl Serializer for FormatSerializer {
    fn serialize(&self, value: &Message) -> Result<Vec<u8>> {
        match self.serializer_type {
            SerializerType::Json => serde_json::to_vec(value).map_err(Error::new),
            SerializerType::MessagePack => rmp_serde::to_vec(value).map_err(Error::new),
        }
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message> {
        match self.serializer_type {
            SerializerType::Json => serde_json::from_slice(bytes).map_err(Error::new),
            SerializerType::MessagePack => rmp_serde::from_slice(bytes).map_err(Error::new),
        }
    }
}

/// Creates a new [`Serializer`] for the given type.
pub fn new_serializer(serializer_type: SerializerType) -> Box<dyn Serializer> {
    Box::new(FormatSerializer { serializer_type })
}
