use std::{
    pin::Pin,
    task,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    Stream,
};
use tokio::sync::mpsc::{
    UnboundedReceiver,
    UnboundedSender,
    unbounded_channel,
};

use crate::transport::transport::{
    Transport,
    TransportData,
};

/// An in-memory transport, connected to exactly one other [`DirectTransport`].
///
/// Closing or dropping one end ends the stream on the other.
#[derive(Debug)]
pub struct DirectTransport {
    tx: Option<UnboundedSender<TransportData>>,
    rx: UnboundedReceiver<TransportData>,
}

impl DirectTransport {
    /// Creates two transports wired to each other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = unbounded_channel();
        let (b_tx, b_rx) = unbounded_channel();
        (
            Self {
                tx: Some(a_tx),
                rx: b_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: a_rx,
            },
        )
    }
}

impl Transport for DirectTransport {}

impl Stream for DirectTransport {
    type Item = Result<TransportData>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|data| data.map(Ok))
    }
}

impl Sink<TransportData> for DirectTransport {
    type Error = Error;

    fn poll_ready(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        match &self.tx {
            Some(tx) if !tx.is_closed() => task::Poll::Ready(Ok(())),
            _ => task::Poll::Ready(Err(Error::msg("direct transport is closed"))),
        }
    }

    fn start_send(
        self: Pin<&mut Self>,
        item: TransportData,
    ) -> std::result::Result<(), Self::Error> {
        match &self.tx {
            Some(tx) => tx
                .send(item)
                .map_err(|_| Error::msg("direct transport is closed")),
            None => Err(Error::msg("direct transport is closed")),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        _: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.tx = None;
        task::Poll::Ready(Ok(()))
    }
}
