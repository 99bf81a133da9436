mod common;

use std::{
    sync::Arc,
    time::Duration,
};

use battler_wamp_peer::{
    core::{
        clock::TokioClock,
        error::PeerClosedError,
    },
    message::message::Message,
    peer::{
        Peer,
        PeerConfig,
        RpcCall,
        SessionStatus,
        connector::DirectConnector,
    },
    serializer::serializer::SerializerType,
};
use common::{
    REALM,
    create_peer,
    create_peer_with_config,
    uri,
};

fn new_peer(config: PeerConfig) -> anyhow::Result<Peer> {
    let (connector, _) = DirectConnector::new(SerializerType::Json);
    Peer::new(
        "direct://router",
        REALM,
        config,
        Arc::new(connector),
        Arc::new(TokioClock),
    )
}

#[tokio::test(start_paused = true)]
async fn connects_only_when_opened() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = create_peer();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!router.has_pending_connection());
    assert_matches::assert_matches!(&*peer.status_rx().borrow(), SessionStatus::Disconnected);

    let lease = peer.open();
    let mut connection = router.accept_session(1).await;
    assert_matches::assert_matches!(peer.session().await, Ok(_));

    drop(lease);
    connection.expect_closed().await;
    assert!(!router.has_pending_connection());
}

#[tokio::test(start_paused = true)]
async fn close_says_goodbye_once() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = create_peer();
    let _lease = peer.open();
    let mut connection = router.accept_session(1).await;
    assert_matches::assert_matches!(peer.session().await, Ok(_));

    assert_matches::assert_matches!(peer.close().await, Ok(()));
    assert_matches::assert_matches!(connection.recv().await, Message::Goodbye(message) => {
        assert_eq!(message.reason.as_ref(), "wamp.close.normal");
    });
    connection.expect_closed().await;

    assert_matches::assert_matches!(peer.close().await, Ok(()));
    assert!(!router.has_pending_connection());
}

#[tokio::test(start_paused = true)]
async fn operations_fail_after_close() {
    test_utils::setup::setup_test_environment();

    let (peer, _router) = create_peer();
    assert_matches::assert_matches!(peer.close().await, Ok(()));

    let err = peer
        .call_and_wait(uri("com.myapp.add2"), RpcCall::default())
        .await
        .unwrap_err();
    assert_matches::assert_matches!(err.downcast_ref::<PeerClosedError>(), Some(_));
}

#[tokio::test(start_paused = true)]
async fn closed_peer_reports_failed_status() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = create_peer();
    let mut status_rx = peer.status_rx();
    let _lease = peer.open();
    let _connection = router.accept_session(1).await;
    assert_matches::assert_matches!(peer.session().await, Ok(_));

    assert_matches::assert_matches!(peer.close().await, Ok(()));
    let err = loop {
        if let SessionStatus::Failed(err) = &*status_rx.borrow_and_update() {
            break err.clone().into_error();
        }
        status_rx.changed().await.unwrap();
    };
    assert_matches::assert_matches!(err.downcast_ref::<PeerClosedError>(), Some(_));
}

#[tokio::test]
async fn rejects_invalid_config() {
    let mut config = PeerConfig::default();
    config.serializers.clear();
    assert_matches::assert_matches!(new_peer(config).err(), Some(err) => {
        assert_eq!(err.to_string(), "at least one serializer is required");
    });

    let mut config = PeerConfig::default();
    config.call_timeout = Duration::ZERO;
    assert!(new_peer(config).is_err());

    let mut config = PeerConfig::default();
    config.reconnect.max_attempts = 0;
    assert!(new_peer(config).is_err());
}

#[tokio::test(start_paused = true)]
async fn dropping_peer_closes_connection() {
    test_utils::setup::setup_test_environment();

    let mut config = PeerConfig::default();
    config.name = "dropped-peer".to_owned();
    let (peer, mut router) = create_peer_with_config(config);
    let lease = peer.open();
    let mut connection = router.accept_session(1).await;
    drop(lease);
    drop(peer);
    connection.expect_closed().await;
}
