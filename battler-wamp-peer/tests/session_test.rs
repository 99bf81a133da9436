mod common;

use battler_wamp_peer::{
    auth::{
        Challenge,
        WampCraChallengeHandler,
    },
    core::error::{
        ChallengeError,
        SessionClosedError,
    },
    message::message::{
        AbortMessage,
        ChallengeMessage,
        GoodbyeMessage,
        Message,
        WelcomeMessage,
    },
    peer::{
        AuthConfig,
        PeerConfig,
        SessionStatus,
    },
};
use battler_wamp_values::{
    Dictionary,
    Value,
};
use common::{
    create_peer,
    create_peer_with_config,
    id,
    uri,
};
use tokio::sync::watch;

/// Waits for the session to be closed, returning the error it closed with.
async fn wait_for_close(status_rx: &mut watch::Receiver<SessionStatus>) -> anyhow::Error {
    loop {
        if let SessionStatus::Closed { error, .. } = &*status_rx.borrow_and_update() {
            return error.clone().into_error();
        }
        status_rx.changed().await.unwrap();
    }
}

fn auth_config() -> PeerConfig {
    let mut config = PeerConfig::default();
    config.name = "test-peer".to_owned();
    config.agent = "test-agent".to_owned();
    config.auth = Some(AuthConfig {
        id: Some("peter".to_owned()),
        methods: vec!["wampcra".to_owned()],
    });
    config
}

fn challenge_message() -> Message {
    Message::Challenge(ChallengeMessage {
        auth_method: "wampcra".to_owned(),
        extra: Dictionary::from_iter([(
            "challenge".to_owned(),
            Value::String("nonce-123".to_owned()),
        )]),
    })
}

#[tokio::test(start_paused = true)]
async fn hello_announces_agent_roles_and_auth() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = create_peer_with_config(auth_config());
    let _lease = peer.open();

    let mut connection = router.accept().await;
    let hello = connection.welcome(1).await;
    assert_eq!(
        hello.details.get("agent"),
        Some(&Value::String("test-agent".to_owned()))
    );
    assert_eq!(
        hello.details.get("authid"),
        Some(&Value::String("peter".to_owned()))
    );
    assert_eq!(
        hello.details.get("authmethods"),
        Some(&Value::List(Vec::from_iter([Value::String(
            "wampcra".to_owned()
        )])))
    );
    assert_matches::assert_matches!(hello.details.get("roles"), Some(Value::Dictionary(roles)) => {
        assert!(roles.contains_key("caller"));
        assert!(roles.contains_key("callee"));
        assert!(roles.contains_key("publisher"));
        assert!(roles.contains_key("subscriber"));
    });

    assert_matches::assert_matches!(peer.session().await, Ok(session) => {
        assert_eq!(session.id, id(1));
        assert_eq!(session.realm.as_ref(), common::REALM);
        assert_eq!(session.generation, 1);
    });
}

#[tokio::test(start_paused = true)]
async fn answers_challenge_with_signature() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = create_peer_with_config(auth_config());
    let handler = WampCraChallengeHandler::new("secret1");
    peer.on_challenge(handler.clone()).await;
    let _lease = peer.open();

    let mut connection = router.accept().await;
    assert_matches::assert_matches!(connection.recv().await, Message::Hello(_));
    connection.send(challenge_message()).await;

    let expected = handler
        .sign(&Challenge {
            auth_method: "wampcra".to_owned(),
            extra: Dictionary::from_iter([(
                "challenge".to_owned(),
                Value::String("nonce-123".to_owned()),
            )]),
        })
        .unwrap();
    assert_matches::assert_matches!(connection.recv().await, Message::Authenticate(message) => {
        assert_eq!(message.signature, expected);
    });

    connection
        .send(Message::Welcome(WelcomeMessage {
            session: id(2),
            details: Dictionary::from_iter([
                ("authid".to_owned(), Value::String("peter".to_owned())),
                ("authrole".to_owned(), Value::String("user".to_owned())),
            ]),
        }))
        .await;
    assert_matches::assert_matches!(peer.session().await, Ok(session) => {
        assert_eq!(session.auth_id(), Some("peter"));
        assert_eq!(session.auth_role(), Some("user"));
    });
}

#[tokio::test(start_paused = true)]
async fn challenge_without_handler_aborts() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = create_peer_with_config(auth_config());
    let mut status_rx = peer.status_rx();
    let _lease = peer.open();

    let mut connection = router.accept().await;
    assert_matches::assert_matches!(connection.recv().await, Message::Hello(_));
    connection.send(challenge_message()).await;

    assert_matches::assert_matches!(connection.recv().await, Message::Abort(message) => {
        assert_eq!(message.reason.as_ref(), "thruway.error.challenge_exception");
    });
    let err = wait_for_close(&mut status_rx).await;
    assert_matches::assert_matches!(err.downcast_ref::<ChallengeError>(), Some(_));
}

#[tokio::test(start_paused = true)]
async fn failing_challenge_handler_aborts() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = create_peer_with_config(auth_config());
    peer.on_challenge(|_: Challenge| async move {
        Err::<String, _>(anyhow::Error::msg("secret unavailable"))
    })
    .await;
    let mut status_rx = peer.status_rx();
    let _lease = peer.open();

    let mut connection = router.accept().await;
    assert_matches::assert_matches!(connection.recv().await, Message::Hello(_));
    connection.send(challenge_message()).await;

    assert_matches::assert_matches!(connection.recv().await, Message::Abort(message) => {
        assert_eq!(message.reason.as_ref(), "thruway.error.challenge_exception");
        assert_eq!(
            message.details.get("message"),
            Some(&Value::String("secret unavailable".to_owned()))
        );
    });
    let err = wait_for_close(&mut status_rx).await;
    assert_eq!(err.to_string(), "secret unavailable");
}

#[tokio::test(start_paused = true)]
async fn abort_closes_session_and_notifies() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = create_peer();
    let mut closed_rx = peer.session_closed_rx();
    let mut status_rx = peer.status_rx();
    let _lease = peer.open();

    let mut connection = router.accept().await;
    assert_matches::assert_matches!(connection.recv().await, Message::Hello(_));
    connection
        .send(Message::Abort(AbortMessage {
            details: Dictionary::from_iter([(
                "message".to_owned(),
                Value::String("realm does not exist".to_owned()),
            )]),
            reason: uri("wamp.error.no_such_realm"),
            ..Default::default()
        }))
        .await;

    pretty_assertions::assert_eq!(
        closed_rx.recv().await.unwrap(),
        SessionClosedError {
            reason: uri("wamp.error.no_such_realm"),
            message: "realm does not exist".to_owned(),
        }
    );
    let err = wait_for_close(&mut status_rx).await;
    assert_matches::assert_matches!(err.downcast_ref::<SessionClosedError>(), Some(err) => {
        assert_eq!(err.reason.as_ref(), "wamp.error.no_such_realm");
    });
}

#[tokio::test(start_paused = true)]
async fn goodbye_is_answered_and_session_reopened() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = create_peer();
    let mut closed_rx = peer.session_closed_rx();
    let _lease = peer.open();

    let mut connection = router.accept_session(1).await;
    connection
        .send(Message::Goodbye(GoodbyeMessage {
            details: Dictionary::default(),
            reason: uri("wamp.close.system_shutdown"),
        }))
        .await;
    assert_matches::assert_matches!(connection.recv().await, Message::Goodbye(message) => {
        assert_eq!(message.reason.as_ref(), "wamp.close.goodbye_and_out");
    });
    assert_matches::assert_matches!(closed_rx.recv().await, Ok(err) => {
        assert_eq!(err.reason.as_ref(), "wamp.close.system_shutdown");
    });
    connection.expect_closed().await;

    let _connection = router.accept_session(2).await;
    assert_matches::assert_matches!(peer.session().await, Ok(session) => {
        assert_eq!(session.id, id(2));
        assert_eq!(session.generation, 2);
    });
}

#[tokio::test(start_paused = true)]
async fn unexpected_welcome_is_a_protocol_violation() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = create_peer();
    let mut status_rx = peer.status_rx();
    let _lease = peer.open();

    let mut connection = router.accept_session(1).await;
    connection
        .send(Message::Welcome(WelcomeMessage {
            session: id(1),
            details: Dictionary::default(),
        }))
        .await;
    assert_matches::assert_matches!(connection.recv().await, Message::Abort(message) => {
        assert_eq!(message.reason.as_ref(), "wamp.error.protocol_violation");
    });
    let err = wait_for_close(&mut status_rx).await;
    assert_matches::assert_matches!(err.downcast_ref::<SessionClosedError>(), Some(err) => {
        assert_eq!(err.reason.as_ref(), "wamp.error.protocol_violation");
    });
}
