use anyhow::Result;
use async_trait::async_trait;

use crate::{
    serializer::serializer::SerializerType,
    transport::transport::Transport,
};

/// A connection to a WAMP router produced by a [`Connector`].
#[derive(Debug)]
pub struct Connection {
    pub transport: Box<dyn Transport>,
    /// The serializer negotiated for the connection.
    pub serializer: SerializerType,
}

/// A type for dialing a router.
///
/// Called by the connection supervisor every time the connection needs to be (re)opened.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Connection>;
}
