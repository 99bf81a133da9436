use std::fmt::Debug;

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    Stream,
};

/// Data received from or sent to a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportData {
    /// A health check from the router, which must be answered with a pong carrying the same data.
    ///
    /// When sent, the data is written as a pong.
    Ping(Vec<u8>),
    /// Data representing a serialized WAMP message.
    Message(Vec<u8>),
}

/// A transport, over which WAMP messages can be sent and received.
///
/// The stream ends when the remote side closes the connection.
pub trait Transport:
    Send + Stream<Item = Result<TransportData>> + Sink<TransportData, Error = Error> + Unpin + Debug
{
}
