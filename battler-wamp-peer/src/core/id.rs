use std::{
    fmt::Display,
    sync::{
        LazyLock,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
};

use battler_wamp_values::{
    Integer,
    Value,
    WampDeserialize,
    WampDeserializeError,
    WampSerialize,
    WampSerializeError,
};
use serde::{
    Deserialize,
    Serialize,
    de::{
        Unexpected,
        Visitor,
    },
};
use thiserror::Error;

/// An integer ID, used for correlating requests and identifying router-side resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Id(u64);

impl Id {
    /// The minimum allowable value of an ID.
    pub const MIN: Id = Id(1);

    /// The maximum allowable value of an ID.
    pub const MAX: Id = Id(1 << 53);

    /// The raw integer value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Id::MIN
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl WampSerialize for Id {
    fn wamp_serialize(self) -> Result<Value, WampSerializeError> {
        self.0.wamp_serialize()
    }
}

impl WampDeserialize for Id {
    fn wamp_deserialize(value: Value) -> Result<Self, WampDeserializeError> {
        Id::try_from(Integer::wamp_deserialize(value)?)
            .map_err(|_| WampDeserializeError::new("invalid id"))
    }
}

/// Error for an ID being out of range.
#[derive(Debug, Error)]
#[error("{value} is out of range for IDs")]
pub struct IdOutOfRange {
    value: u64,
}

impl TryFrom<u64> for Id {
    type Error = IdOutOfRange;
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value < Self::MIN.0 || value > Self::MAX.0 {
            Err(IdOutOfRange { value })
        } else {
            Ok(Id(value))
        }
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = Id;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            "an unsigned integer in the range [{}, {}]",
            Id::MIN,
            Id::MAX
        )
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Id::try_from(v).map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        match u64::try_from(v) {
            Ok(v) => self.visit_u64(v),
            Err(_) => Err(E::invalid_value(Unexpected::Signed(v), &self)),
        }
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_u64(IdVisitor)
    }
}

/// An ID allocator.
///
/// Allocation is synchronous so that teardown paths running inside [`Drop`] can mint request IDs.
pub trait IdAllocator: Send + Sync {
    /// Generates a new ID.
    fn generate_id(&self) -> Id;
}

/// An ID allocator that generates IDs sequentially, wrapping back to [`Id::MIN`] after
/// [`Id::MAX`].
#[derive(Debug)]
pub struct SequentialIdAllocator {
    next: AtomicU64,
}

impl Default for SequentialIdAllocator {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(Id::MIN.0),
        }
    }
}

impl IdAllocator for SequentialIdAllocator {
    fn generate_id(&self) -> Id {
        let (Ok(id) | Err(id)) =
            self.next
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                    Some(if id >= Id::MAX.0 { Id::MIN.0 } else { id + 1 })
                });
        Id(id)
    }
}

static REQUEST_IDS: LazyLock<SequentialIdAllocator> =
    LazyLock::new(SequentialIdAllocator::default);

/// Generates a new request ID from the process-wide allocator.
///
/// Every request-bearing message sent by any peer in the process draws from the same sequence, so
/// an ID is never reused while an earlier request with the same ID could still be in flight.
pub fn next_request_id() -> Id {
    REQUEST_IDS.generate_id()
}
