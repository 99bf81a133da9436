use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use tokio::sync::mpsc::{
    UnboundedReceiver,
    UnboundedSender,
    unbounded_channel,
};

use crate::{
    peer::connector::connector::{
        Connection,
        Connector,
    },
    serializer::serializer::SerializerType,
    transport::direct_transport::DirectTransport,
};

/// A [`Connector`] for a router living in the same process.
///
/// Every dial creates a [`DirectTransport`] pair and hands the router's end to the acceptor
/// channel. Dials fail once the acceptor is dropped.
#[derive(Debug)]
pub struct DirectConnector {
    serializer: SerializerType,
    acceptor_tx: UnboundedSender<DirectTransport>,
}

impl DirectConnector {
    /// Creates a new connector, along with the channel the router accepts connections from.
    pub fn new(serializer: SerializerType) -> (Self, UnboundedReceiver<DirectTransport>) {
        let (acceptor_tx, acceptor_rx) = unbounded_channel();
        (
            Self {
                serializer,
                acceptor_tx,
            },
            acceptor_rx,
        )
    }
}

#[async_trait]
impl Connector for DirectConnector {
    async fn connect(&self, _: &str) -> Result<Connection> {
        let (local, remote) = DirectTransport::pair();
        self.acceptor_tx
            .send(remote)
            .map_err(|_| Error::msg("router is not accepting connections"))?;
        Ok(Connection {
            transport: Box::new(local),
            serializer: self.serializer,
        })
    }
}
