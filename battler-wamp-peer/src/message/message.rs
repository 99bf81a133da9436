use battler_wamp_values::{
    Dictionary,
    Integer,
    List,
    Value,
};
use serde_struct_tuple::{
    DeserializeStructTuple,
    SerializeStructTuple,
};
use serde_struct_tuple_enum::{
    DeserializeStructTupleEnum,
    SerializeStructTupleEnum,
};

use crate::core::{
    id::Id,
    uri::Uri,
};

// Positional arguments are never skipped. The tuple serializer stops at the first skipped field,
// which would drop the keyword arguments behind them.

/// A HELLO message for a peer to initiate a WAMP session in a realm.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct HelloMessage {
    pub realm: Uri,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub details: Dictionary,
}

/// A WELCOME message for a router to confirm a peer's WAMP session in a realm.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct WelcomeMessage {
    pub session: Id,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub details: Dictionary,
}

/// An ABORT message for quickly terminating a WAMP session.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct AbortMessage {
    pub details: Dictionary,
    pub reason: Uri,
    #[serde_struct_tuple(default)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

/// A CHALLENGE message for a router to request authentication from a peer.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct ChallengeMessage {
    pub auth_method: String,
    #[serde_struct_tuple(default)]
    pub extra: Dictionary,
}

/// An AUTHENTICATE message for a peer to answer a CHALLENGE.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct AuthenticateMessage {
    pub signature: String,
    #[serde_struct_tuple(default)]
    pub extra: Dictionary,
}

/// A GOODBYE message for ending a WAMP session with a two-way handshake.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct GoodbyeMessage {
    pub details: Dictionary,
    pub reason: Uri,
}

/// An ERROR message for communicating an error in response to a single request.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct ErrorMessage {
    pub request_type: Integer,
    pub request: Id,
    pub details: Dictionary,
    pub error: Uri,
    #[serde_struct_tuple(default)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

/// A PUBLISH message for publishing an event to a topic.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct PublishMessage {
    pub request: Id,
    pub options: Dictionary,
    pub topic: Uri,
    #[serde_struct_tuple(default)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

/// A PUBLISHED message for acknowledging an event was published.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct PublishedMessage {
    pub publish_request: Id,
    pub publication: Id,
}

/// A SUBSCRIBE message for subscribing to a topic.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct SubscribeMessage {
    pub request: Id,
    pub options: Dictionary,
    pub topic: Uri,
}

/// A SUBSCRIBED message for confirming a peer has subscribed to a topic.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct SubscribedMessage {
    pub subscribe_request: Id,
    pub subscription: Id,
}

/// An UNSUBSCRIBE message for unsubscribing from a topic.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct UnsubscribeMessage {
    pub request: Id,
    pub subscribed_subscription: Id,
}

/// An UNSUBSCRIBED message for confirming a peer has unsubscribed from a topic.
///
/// When the router revokes a subscription on its own, the request is `0` and the details name the
/// revoked subscription.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct UnsubscribedMessage {
    pub unsubscribe_request: Integer,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub details: Dictionary,
}

impl UnsubscribedMessage {
    /// The subscription revoked by the router, if this message is a revocation.
    pub fn revoked_subscription(&self) -> Option<Id> {
        revoked_id(&self.details, "subscription")
    }
}

/// An EVENT message for relaying a published event to subscribers.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct EventMessage {
    pub subscribed_subscription: Id,
    pub published_publication: Id,
    pub details: Dictionary,
    #[serde_struct_tuple(default)]
    pub publish_arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub publish_arguments_keyword: Dictionary,
}

/// A CALL message for invoking a procedure.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct CallMessage {
    pub request: Id,
    pub options: Dictionary,
    pub procedure: Uri,
    #[serde_struct_tuple(default)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

/// A CANCEL message for a caller to abandon a pending call.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct CancelMessage {
    pub call_request: Id,
    pub options: Dictionary,
}

/// A RESULT message for sending the result of a procedure invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct ResultMessage {
    pub call_request: Id,
    pub details: Dictionary,
    #[serde_struct_tuple(default)]
    pub yield_arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub yield_arguments_keyword: Dictionary,
}

impl ResultMessage {
    /// Whether more results follow this one.
    pub fn progress(&self) -> bool {
        progress(&self.details)
    }
}

/// A REGISTER message for registering a procedure in the realm.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct RegisterMessage {
    pub request: Id,
    pub options: Dictionary,
    pub procedure: Uri,
}

/// A REGISTERED message for confirming a procedure has been registered.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct RegisteredMessage {
    pub register_request: Id,
    pub registration: Id,
}

/// An UNREGISTER message for unregistering a procedure in the realm.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct UnregisterMessage {
    pub request: Id,
    pub registered_registration: Id,
}

/// An UNREGISTERED message for confirming a procedure has been unregistered.
///
/// When the router revokes a registration on its own, the request is `0` and the details name the
/// revoked registration.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct UnregisteredMessage {
    pub unregister_request: Integer,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub details: Dictionary,
}

impl UnregisteredMessage {
    /// The registration revoked by the router, if this message is a revocation.
    pub fn revoked_registration(&self) -> Option<Id> {
        revoked_id(&self.details, "registration")
    }
}

/// An INVOCATION message for invoking a procedure on its callee.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct InvocationMessage {
    pub request: Id,
    pub registered_registration: Id,
    pub details: Dictionary,
    #[serde_struct_tuple(default)]
    pub call_arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub call_arguments_keyword: Dictionary,
}

/// An INTERRUPT message for a router to stop an in-flight invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct InterruptMessage {
    pub invocation_request: Id,
    pub options: Dictionary,
}

/// A YIELD message for yielding the result of an invocation from the callee.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct YieldMessage {
    pub invocation_request: Id,
    pub options: Dictionary,
    #[serde_struct_tuple(default)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

impl YieldMessage {
    /// Whether more results follow this one.
    pub fn progress(&self) -> bool {
        progress(&self.options)
    }
}

fn progress(dictionary: &Dictionary) -> bool {
    dictionary
        .get("progress")
        .and_then(Value::bool)
        .unwrap_or(false)
}

fn revoked_id(details: &Dictionary, key: &str) -> Option<Id> {
    details
        .get(key)
        .and_then(Value::integer)
        .and_then(|id| Id::try_from(id).ok())
}

/// A WAMP message.
#[derive(Debug, Clone, PartialEq, Eq, SerializeStructTupleEnum, DeserializeStructTupleEnum)]
#[tag(Integer)]
pub enum Message {
    #[tag = 1]
    Hello(HelloMessage),
    #[tag = 2]
    Welcome(WelcomeMessage),
    #[tag = 3]
    Abort(AbortMessage),
    #[tag = 4]
    Challenge(ChallengeMessage),
    #[tag = 5]
    Authenticate(AuthenticateMessage),
    #[tag = 6]
    Goodbye(GoodbyeMessage),
    #[tag = 8]
    Error(ErrorMessage),
    #[tag = 16]
    Publish(PublishMessage),
    #[tag = 17]
    Published(PublishedMessage),
    #[tag = 32]
    Subscribe(SubscribeMessage),
    #[tag = 33]
    Subscribed(SubscribedMessage),
    #[tag = 34]
    Unsubscribe(UnsubscribeMessage),
    #[tag = 35]
    Unsubscribed(UnsubscribedMessage),
    #[tag = 36]
    Event(EventMessage),
    #[tag = 48]
    Call(CallMessage),
    #[tag = 49]
    Cancel(CancelMessage),
    #[tag = 50]
    Result(ResultMessage),
    #[tag = 64]
    Register(RegisterMessage),
    #[tag = 65]
    Registered(RegisteredMessage),
    #[tag = 66]
    Unregister(UnregisterMessage),
    #[tag = 67]
    Unregistered(UnregisteredMessage),
    #[tag = 68]
    Invocation(InvocationMessage),
    #[tag = 69]
    Interrupt(InterruptMessage),
    #[tag = 70]
    Yield(YieldMessage),
}

impl Message {
    /// The message name, mostly for logging.
    pub fn message_name(&self) -> &'static str {
        match self {
            Self::Hello(_) => "HELLO",
            Self::Welcome(_) => "WELCOME",
            Self::Abort(_) => "ABORT",
            Self::Challenge(_) => "CHALLENGE",
            Self::Authenticate(_) => "AUTHENTICATE",
            Self::Goodbye(_) => "GOODBYE",
            Self::Error(_) => "ERROR",
            Self::Publish(_) => "PUBLISH",
            Self::Published(_) => "PUBLISHED",
            Self::Subscribe(_) => "SUBSCRIBE",
            Self::Subscribed(_) => "SUBSCRIBED",
            Self::Unsubscribe(_) => "UNSUBSCRIBE",
            Self::Unsubscribed(_) => "UNSUBSCRIBED",
            Self::Event(_) => "EVENT",
            Self::Call(_) => "CALL",
            Self::Cancel(_) => "CANCEL",
            Self::Result(_) => "RESULT",
            Self::Register(_) => "REGISTER",
            Self::Registered(_) => "REGISTERED",
            Self::Unregister(_) => "UNREGISTER",
            Self::Unregistered(_) => "UNREGISTERED",
            Self::Invocation(_) => "INVOCATION",
            Self::Interrupt(_) => "INTERRUPT",
            Self::Yield(_) => "YIELD",
        }
    }

    /// The request ID on the message.
    pub fn request_id(&self) -> Option<Id> {
        match self {
            Self::Error(message) => Some(message.request),
            Self::Publish(message) => Some(message.request),
            Self::Published(message) => Some(message.publish_request),
            Self::Subscribe(message) => Some(message.request),
            Self::Subscribed(message) => Some(message.subscribe_request),
            Self::Unsubscribe(message) => Some(message.request),
            Self::Unsubscribed(message) => Id::try_from(message.unsubscribe_request).ok(),
            Self::Call(message) => Some(message.request),
            Self::Cancel(message) => Some(message.call_request),
            Self::Result(message) => Some(message.call_request),
            Self::Register(message) => Some(message.request),
            Self::Registered(message) => Some(message.register_request),
            Self::Unregister(message) => Some(message.request),
            Self::Unregistered(message) => Id::try_from(message.unregister_request).ok(),
            Self::Invocation(message) => Some(message.request),
            Self::Interrupt(message) => Some(message.invocation_request),
            Self::Yield(message) => Some(message.invocation_request),
            _ => None,
        }
    }

    /// The details dictionary on the message.
    pub fn details(&self) -> Option<&Dictionary> {
        match self {
            Self::Hello(message) => Some(&message.details),
            Self::Welcome(message) => Some(&message.details),
            Self::Abort(message) => Some(&message.details),
            Self::Goodbye(message) => Some(&message.details),
            Self::Error(message) => Some(&message.details),
            Self::Unsubscribed(message) => Some(&message.details),
            Self::Event(message) => Some(&message.details),
            Self::Result(message) => Some(&message.details),
            Self::Unregistered(message) => Some(&message.details),
            Self::Invocation(message) => Some(&message.details),
            _ => None,
        }
    }

    /// The error reason on the message.
    pub fn reason(&self) -> Option<&Uri> {
        match self {
            Self::Abort(message) => Some(&message.reason),
            Self::Goodbye(message) => Some(&message.reason),
            Self::Error(message) => Some(&message.error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod message_test {
    use battler_wamp_values::{
        Dictionary,
        List,
        Value,
    };

    use crate::{
        core::{
            id::Id,
            uri::Uri,
        },
        message::message::{
            AuthenticateMessage,
            CallMessage,
            CancelMessage,
            ChallengeMessage,
            ErrorMessage,
            HelloMessage,
            Message,
            ResultMessage,
            UnregisteredMessage,
            YieldMessage,
        },
    };

    #[test]
    fn deserializes_message_from_tuple() {
        assert_matches::assert_matches!(serde_json::from_str(r#"
            [1, "realm1"]
        "#), Ok(Message::Hello(message)) => {
            assert_eq!(message, HelloMessage {
                realm: Uri::try_from("realm1").unwrap(),
                details: Dictionary::default(),
            })
        });

        assert_matches::assert_matches!(serde_json::from_str(r#"
            [48, 7814135, {}, "com.myapp.user.new", ["Johnny"], {
                "firstname": "John",
                "surname": "Doe"
            }]
        "#), Ok(Message::Call(message)) => {
            pretty_assertions::assert_eq!(message, CallMessage {
                request: Id::try_from(7814135).unwrap(),
                options: Dictionary::default(),
                procedure: Uri::try_from("com.myapp.user.new").unwrap(),
                arguments: List::from_iter([
                    Value::String("Johnny".to_owned()),
                ]),
                arguments_keyword: Dictionary::from_iter([
                    ("firstname".to_owned(), Value::String("John".to_owned())),
                    ("surname".to_owned(), Value::String("Doe".to_owned())),
                ]),
            })
        });

        assert_matches::assert_matches!(serde_json::from_str(r#"
            [4, "wampcra", { "challenge": "{\"nonce\": \"LHRTC9zeOIrt_9U3\"}" }]
        "#), Ok(Message::Challenge(message)) => {
            assert_eq!(message, ChallengeMessage {
                auth_method: "wampcra".to_owned(),
                extra: Dictionary::from_iter([
                    ("challenge".to_owned(), Value::String(r#"{"nonce": "LHRTC9zeOIrt_9U3"}"#.to_owned())),
                ]),
            })
        });

        assert_matches::assert_matches!(serde_json::from_str(r#"
            [8, 48, 7814135, {}, "wamp.error.no_such_procedure"]
        "#), Ok(Message::Error(message)) => {
            assert_eq!(message, ErrorMessage {
                request_type: 48,
                request: Id::try_from(7814135).unwrap(),
                details: Dictionary::default(),
                error: Uri::try_from("wamp.error.no_such_procedure").unwrap(),
                arguments: List::default(),
                arguments_keyword: Dictionary::default(),
            })
        });
    }

    #[test]
    fn deserializes_revocations() {
        assert_matches::assert_matches!(serde_json::from_str(r#"
            [67, 0, { "registration": 54321, "reason": "wamp.close.killed" }]
        "#), Ok(Message::Unregistered(message)) => {
            assert_eq!(message.revoked_registration(), Some(Id::try_from(54321).unwrap()));
            assert_eq!(Message::Unregistered(message).request_id(), None);
        });

        assert_matches::assert_matches!(serde_json::from_str(r#"
            [67, 12]
        "#), Ok(Message::Unregistered(message)) => {
            assert_eq!(message, UnregisteredMessage {
                unregister_request: 12,
                details: Dictionary::default(),
            });
            assert_eq!(message.revoked_registration(), None);
        });

        assert_matches::assert_matches!(serde_json::from_str(r#"
            [35, 0, { "subscription": 9 }]
        "#), Ok(Message::Unsubscribed(message)) => {
            assert_eq!(message.revoked_subscription(), Some(Id::try_from(9).unwrap()));
        });
    }

    #[test]
    fn reads_progress_flags() {
        assert_matches::assert_matches!(serde_json::from_str(r#"
            [50, 1, { "progress": true }, [1]]
        "#), Ok(Message::Result(message)) => {
            assert!(message.progress());
        });
        assert!(!ResultMessage::default().progress());
        assert!(
            YieldMessage {
                options: Dictionary::from_iter([("progress".to_owned(), Value::Bool(true))]),
                ..Default::default()
            }
            .progress()
        );
    }

    #[test]
    fn serializes_message_to_tuple() {
        assert_matches::assert_matches!(
            serde_json::to_string(&Message::Cancel(CancelMessage {
                call_request: Id::try_from(12345).unwrap(),
                options: Dictionary::default(),
            })),
            Ok(serialized) => {
                assert_eq!(serialized, r#"[49,12345,{}]"#);
            }
        );

        assert_matches::assert_matches!(
            serde_json::to_string(&Message::Authenticate(AuthenticateMessage {
                signature: "abc".to_owned(),
                extra: Dictionary::default(),
            })),
            Ok(serialized) => {
                assert_eq!(serialized, r#"[5,"abc",{}]"#);
            }
        );

        assert_matches::assert_matches!(
            serde_json::to_string(&Message::Yield(YieldMessage {
                invocation_request: Id::try_from(7).unwrap(),
                options: Dictionary::default(),
                arguments: List::from_iter([Value::Integer(1)]),
                arguments_keyword: Dictionary::default(),
            })),
            Ok(serialized) => {
                assert_eq!(serialized, r#"[70,7,{},[1]]"#);
            }
        );
    }

    #[test]
    fn exposes_tags() {
        assert_eq!(Message::Cancel(CancelMessage::default()).tag(), 49);
        assert_eq!(Message::Yield(YieldMessage::default()).tag(), 70);
        assert_eq!(
            Message::Challenge(ChallengeMessage::default()).message_name(),
            "CHALLENGE"
        );
    }
}
