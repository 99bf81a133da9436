#![allow(dead_code)]

use std::{
    sync::Arc,
    time::Duration,
};

use battler_wamp_peer::{
    core::{
        clock::TokioClock,
        id::Id,
        stream::{
            MessageStream,
            StreamMessage,
        },
        uri::Uri,
    },
    message::message::{
        HelloMessage,
        Message,
        WelcomeMessage,
    },
    peer::{
        Peer,
        PeerConfig,
        connector::DirectConnector,
    },
    serializer::serializer::{
        SerializerType,
        new_serializer,
    },
    transport::direct_transport::DirectTransport,
};
use battler_wamp_values::Dictionary;
use futures_util::{
    SinkExt,
    StreamExt,
};
use tokio::sync::mpsc::UnboundedReceiver;

pub const REALM: &str = "com.battler.test";

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(600);
const QUIET_PERIOD: Duration = Duration::from_millis(100);

pub fn uri(uri: &str) -> Uri {
    Uri::try_from(uri).unwrap()
}

pub fn id(id: u64) -> Id {
    Id::try_from(id).unwrap()
}

/// A scripted router, accepting connections from a single peer.
pub struct TestRouter {
    acceptor_rx: UnboundedReceiver<DirectTransport>,
}

impl TestRouter {
    /// Waits for the next connection from the peer.
    pub async fn accept(&mut self) -> RouterConnection {
        let transport = tokio::time::timeout(RECEIVE_TIMEOUT, self.acceptor_rx.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("connector dropped");
        RouterConnection {
            stream: MessageStream::new(Box::new(transport), new_serializer(SerializerType::Json)),
        }
    }

    /// Accepts the next connection and establishes a session on it.
    pub async fn accept_session(&mut self, session: u64) -> RouterConnection {
        let mut connection = self.accept().await;
        connection.welcome(session).await;
        connection
    }

    /// Whether the peer has dialed without being accepted.
    pub fn has_pending_connection(&mut self) -> bool {
        !self.acceptor_rx.is_empty()
    }

    /// Stops accepting connections, so that every later dial fails.
    pub fn stop_accepting(self) {}
}

/// The router's end of one connection.
pub struct RouterConnection {
    stream: MessageStream,
}

impl RouterConnection {
    pub async fn send(&mut self, message: Message) {
        self.stream
            .send(StreamMessage::Message(message))
            .await
            .unwrap();
    }

    /// Receives the next message from the peer.
    pub async fn recv(&mut self) -> Message {
        match tokio::time::timeout(RECEIVE_TIMEOUT, self.stream.next())
            .await
            .expect("timed out waiting for message")
        {
            Some(Ok(StreamMessage::Message(message))) => message,
            message => panic!("expected message, got {message:?}"),
        }
    }

    /// Asserts that the peer sends nothing for a short period.
    pub async fn expect_quiet(&mut self) {
        if let Ok(Some(message)) = tokio::time::timeout(QUIET_PERIOD, self.stream.next()).await {
            panic!("expected no message, got {message:?}");
        }
    }

    /// Waits for the peer to close the connection.
    pub async fn expect_closed(&mut self) {
        loop {
            match tokio::time::timeout(RECEIVE_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for connection to close")
            {
                Some(Ok(_)) => continue,
                _ => return,
            }
        }
    }

    /// Receives HELLO and answers it with WELCOME.
    pub async fn welcome(&mut self, session: u64) -> HelloMessage {
        let hello = match self.recv().await {
            Message::Hello(hello) => hello,
            message => panic!("expected HELLO, got {message:?}"),
        };
        assert_eq!(hello.realm.as_ref(), REALM);
        self.send(Message::Welcome(WelcomeMessage {
            session: id(session),
            details: Dictionary::default(),
        }))
        .await;
        hello
    }
}

/// Creates a peer wired to a scripted router.
pub fn create_peer_with_config(config: PeerConfig) -> (Peer, TestRouter) {
    let (connector, acceptor_rx) = DirectConnector::new(SerializerType::Json);
    let peer = Peer::new(
        "direct://router",
        REALM,
        config,
        Arc::new(connector),
        Arc::new(TokioClock),
    )
    .unwrap();
    (peer, TestRouter { acceptor_rx })
}

pub fn create_peer() -> (Peer, TestRouter) {
    let mut config = PeerConfig::default();
    config.name = "test-peer".to_owned();
    create_peer_with_config(config)
}
