use battler_wamp_values::{
    Dictionary,
    List,
    Value,
};
use thiserror::Error;

use crate::{
    core::uri::Uri,
    message::message::{
        AbortMessage,
        ErrorMessage,
        GoodbyeMessage,
    },
};

/// Error reported by the router in response to a single request.
///
/// Displays as `<error>:<uri>`, where `uri` is the procedure, topic, or other resource the request
/// targeted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}:{uri}")]
pub struct WampError {
    /// The error URI.
    pub error: Uri,
    /// The resource the failed request targeted.
    pub uri: Uri,
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    pub details: Dictionary,
}

impl WampError {
    /// Creates a new error with no payload, for handlers to fail invocations with a specific error
    /// URI.
    pub fn new(error: Uri, uri: Uri) -> Self {
        Self {
            error,
            uri,
            arguments: List::default(),
            arguments_keyword: Dictionary::default(),
            details: Dictionary::default(),
        }
    }

    /// Creates the error for an ERROR message answering a request against `uri`.
    pub fn from_message(message: ErrorMessage, uri: Uri) -> Self {
        Self {
            error: message.error,
            uri,
            arguments: message.arguments,
            arguments_keyword: message.arguments_keyword,
            details: message.details,
        }
    }

    /// The human-readable message attached to the error, if any.
    pub fn message(&self) -> Option<&str> {
        self.details.get("message").and_then(Value::string)
    }
}

/// Error for a peer not being connected for some operation.
#[derive(Debug, Error)]
#[error("peer is not connected")]
pub struct PeerNotConnectedError;

/// Error for the peer being closed by the application.
#[derive(Debug, Error)]
#[error("peer is closed")]
pub struct PeerClosedError;

/// Error for the connection being lost for good, after all reconnect attempts failed.
#[derive(Debug, Error)]
#[error("failed to connect to {url} after {attempts} attempt(s): {msg}")]
pub struct PeerConnectionError {
    pub url: String,
    pub attempts: u32,
    pub msg: String,
}

/// Error for the router ending the session with ABORT or GOODBYE.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} {reason}")]
pub struct SessionClosedError {
    pub reason: Uri,
    pub message: String,
}

impl From<&AbortMessage> for SessionClosedError {
    fn from(value: &AbortMessage) -> Self {
        Self {
            reason: value.reason.clone(),
            message: message_from_details(&value.details),
        }
    }
}

impl From<&GoodbyeMessage> for SessionClosedError {
    fn from(value: &GoodbyeMessage) -> Self {
        Self {
            reason: value.reason.clone(),
            message: message_from_details(&value.details),
        }
    }
}

/// Error for the challenge handler failing to answer an authentication challenge.
#[derive(Debug, Error)]
#[error("{msg}")]
pub struct ChallengeError {
    msg: String,
}

impl ChallengeError {
    pub fn new<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self { msg: msg.into() }
    }
}

/// Error for a procedure call not resolving in time.
#[derive(Debug, Error)]
#[error("call to {procedure} timed out")]
pub struct CallTimeoutError {
    pub procedure: Uri,
}

fn message_from_details(details: &Dictionary) -> String {
    details
        .get("message")
        .and_then(Value::string)
        .unwrap_or_default()
        .to_owned()
}

/// An error that can be transmitted over channels.
///
/// Errors shared by many receivers, such as the failure of the session, are cloned into every
/// operation waiting on them.
#[derive(Debug, Clone)]
pub enum ChannelTransmittableError {
    NotConnected,
    Closed,
    Connection {
        url: String,
        attempts: u32,
        msg: String,
    },
    Session(SessionClosedError),
    Wamp(WampError),
    Challenge(String),
    Timeout(Uri),
    Other(String),
}

impl ChannelTransmittableError {
    /// Converts the error into a real error object that can be returned out.
    pub fn into_error(self) -> anyhow::Error {
        match self {
            Self::NotConnected => PeerNotConnectedError.into(),
            Self::Closed => PeerClosedError.into(),
            Self::Connection { url, attempts, msg } => {
                PeerConnectionError { url, attempts, msg }.into()
            }
            Self::Session(err) => err.into(),
            Self::Wamp(err) => err.into(),
            Self::Challenge(msg) => ChallengeError::new(msg).into(),
            Self::Timeout(procedure) => CallTimeoutError { procedure }.into(),
            Self::Other(msg) => anyhow::Error::msg(msg),
        }
    }
}

impl From<&anyhow::Error> for ChannelTransmittableError {
    fn from(value: &anyhow::Error) -> Self {
        if value.downcast_ref::<PeerNotConnectedError>().is_some() {
            Self::NotConnected
        } else if value.downcast_ref::<PeerClosedError>().is_some() {
            Self::Closed
        } else if let Some(err) = value.downcast_ref::<PeerConnectionError>() {
            Self::Connection {
                url: err.url.clone(),
                attempts: err.attempts,
                msg: err.msg.clone(),
            }
        } else if let Some(err) = value.downcast_ref::<SessionClosedError>() {
            Self::Session(err.clone())
        } else if let Some(err) = value.downcast_ref::<WampError>() {
            Self::Wamp(err.clone())
        } else if let Some(err) = value.downcast_ref::<ChallengeError>() {
            Self::Challenge(err.msg.clone())
        } else if let Some(err) = value.downcast_ref::<CallTimeoutError>() {
            Self::Timeout(err.procedure.clone())
        } else {
            Self::Other(format!("{value:#}"))
        }
    }
}

impl From<anyhow::Error> for ChannelTransmittableError {
    fn from(value: anyhow::Error) -> Self {
        Self::from(&value)
    }
}
