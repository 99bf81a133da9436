use anyhow::Result;
use battler_wamp_values::{
    Dictionary,
    Value,
    WampSerialize,
};

use crate::core::features::{
    CalleeFeatures,
    CallerFeatures,
    PublisherFeatures,
    SubscriberFeatures,
};

/// A role a peer can take on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    // Calls RPC endpoints.
    Caller,
    // Registers RPC endpoints.
    Callee,
    // Publishes events to topics.
    Publisher,
    // Subscribes to events for topics.
    Subscriber,
}

impl PeerRole {
    /// The advanced features announced for the role in HELLO.
    pub fn features(&self) -> Result<Value> {
        let features = match self {
            Self::Caller => CallerFeatures::supported().wamp_serialize()?,
            Self::Callee => CalleeFeatures::supported().wamp_serialize()?,
            Self::Publisher => PublisherFeatures::supported().wamp_serialize()?,
            Self::Subscriber => SubscriberFeatures::supported().wamp_serialize()?,
        };
        Ok(features)
    }
}

impl TryFrom<&str> for PeerRole {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "caller" => Ok(Self::Caller),
            "callee" => Ok(Self::Callee),
            "publisher" => Ok(Self::Publisher),
            "subscriber" => Ok(Self::Subscriber),
            _ => Err(Self::Error::msg(format!("invalid peer role: {value}"))),
        }
    }
}

impl From<PeerRole> for &'static str {
    fn from(value: PeerRole) -> Self {
        match value {
            PeerRole::Caller => "caller",
            PeerRole::Callee => "callee",
            PeerRole::Publisher => "publisher",
            PeerRole::Subscriber => "subscriber",
        }
    }
}

impl From<PeerRole> for String {
    fn from(value: PeerRole) -> Self {
        Into::<&'static str>::into(value).to_owned()
    }
}

/// Builds the `roles` dictionary sent in HELLO details.
pub fn roles_dictionary<'r, I>(roles: I) -> Result<Dictionary>
where
    I: IntoIterator<Item = &'r PeerRole>,
{
    let mut dictionary = Dictionary::default();
    for role in roles {
        dictionary.insert(
            (*role).into(),
            Value::Dictionary(Dictionary::from_iter([(
                "features".to_owned(),
                role.features()?,
            )])),
        );
    }
    Ok(dictionary)
}
