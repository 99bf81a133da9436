use std::{
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use tokio::sync::{
    mpsc::{
        UnboundedReceiver,
        UnboundedSender,
        unbounded_channel,
    },
    watch,
};

use crate::{
    core::{
        backoff::ReconnectConfig,
        clock::Clock,
        error::PeerClosedError,
    },
    message::message::Message,
    peer::{
        dispatcher::RouteKey,
        session::{
            Session,
            SessionStatus,
        },
        supervisor::{
            ConnectionLease,
            OutboundMessage,
            SupervisorCommand,
        },
    },
};

/// State shared by every operation of a peer.
#[derive(Debug)]
pub(crate) struct PeerContext {
    pub name: String,
    pub command_tx: UnboundedSender<SupervisorCommand>,
    pub outbound_tx: UnboundedSender<OutboundMessage>,
    pub status_rx: watch::Receiver<SessionStatus>,
    pub clock: Arc<dyn Clock>,
    pub call_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl PeerContext {
    pub fn lease(&self) -> ConnectionLease {
        ConnectionLease::new(self.command_tx.clone())
    }

    pub fn status_rx(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Sends a message on the given connection generation.
    pub fn send(&self, generation: u64, message: Message) -> Result<()> {
        self.outbound_tx
            .send(OutboundMessage {
                generation,
                message,
                route: None,
            })
            .map_err(|_| PeerClosedError.into())
    }

    /// Sends a request on the session, returning the receiver for messages routed by `key`.
    ///
    /// The receiver ends when the route is finished or the connection is lost.
    pub fn send_routed(
        &self,
        session: &Session,
        message: Message,
        key: RouteKey,
    ) -> Result<UnboundedReceiver<Message>> {
        let (tx, rx) = unbounded_channel();
        self.outbound_tx
            .send(OutboundMessage {
                generation: session.generation,
                message,
                route: Some((key, tx)),
            })
            .map_err(|_| PeerClosedError)?;
        Ok(rx)
    }
}
