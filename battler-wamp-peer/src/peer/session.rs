use std::sync::Arc;

use anyhow::{
    Error,
    Result,
};
use battler_wamp_values::{
    Dictionary,
    Value,
};
use futures_util::{
    FutureExt,
    future::BoxFuture,
    lock::Mutex,
};
use log::{
    debug,
    error,
    info,
    warn,
};
use tokio::sync::{
    broadcast,
    mpsc::{
        UnboundedReceiver,
        UnboundedSender,
    },
    watch,
};

use crate::{
    auth::{
        Challenge,
        ChallengeHandler,
    },
    core::{
        error::{
            ChannelTransmittableError,
            PeerClosedError,
            SessionClosedError,
        },
        id::Id,
        uri::Uri,
    },
    message::{
        common::{
            PROTOCOL_VIOLATION,
            abort_message_for_challenge_error,
            abort_message_for_protocol_violation,
            goodbye_and_out,
        },
        message::{
            AuthenticateMessage,
            HelloMessage,
            Message,
        },
    },
    peer::supervisor::{
        OutboundMessage,
        SupervisorCommand,
    },
};

/// An established WAMP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The session ID assigned by the router.
    pub id: Id,
    pub realm: Uri,
    /// The connection generation the session lives on.
    pub generation: u64,
    /// Details from WELCOME, such as the router's roles.
    pub details: Dictionary,
}

impl Session {
    /// The authenticated ID, if the router reported one.
    pub fn auth_id(&self) -> Option<&str> {
        self.details.get("authid").and_then(Value::string)
    }

    /// The authenticated role, if the router reported one.
    pub fn auth_role(&self) -> Option<&str> {
        self.details.get("authrole").and_then(Value::string)
    }
}

/// The state of the peer's session, observed by every operation.
#[derive(Debug, Clone)]
pub enum SessionStatus {
    /// No session is established. A new one is established when a connection opens.
    Disconnected,
    Established(Session),
    /// The session on the given connection generation was ended by ABORT, GOODBYE, or a failed
    /// handshake.
    ///
    /// The connection is reopened, so a later session may still be established.
    Closed {
        generation: u64,
        error: ChannelTransmittableError,
    },
    /// No session will ever be established again.
    Failed(ChannelTransmittableError),
}

/// Waits for an established session.
///
/// A session on generation `after` is skipped, so that an operation that just lost its session
/// waits for the next one. Fails if the session is closed while waiting or if the peer fails.
pub(crate) async fn wait_for_session(
    status_rx: &mut watch::Receiver<SessionStatus>,
    after: Option<u64>,
) -> Result<Session> {
    let mut first = true;
    loop {
        let status = status_rx.borrow_and_update().clone();
        match status {
            SessionStatus::Established(session) if Some(session.generation) != after => {
                return Ok(session);
            }
            SessionStatus::Failed(err) => return Err(err.into_error()),
            SessionStatus::Closed { generation, error } => {
                // A close observed up front is stale unless it ended the session we are leaving.
                if !first || Some(generation) == after {
                    return Err(error.into_error());
                }
            }
            _ => (),
        }
        first = false;
        if status_rx.changed().await.is_err() {
            return Err(PeerClosedError.into());
        }
    }
}

/// Waits for the session status to settle after an operation lost its routes on `generation`.
///
/// Fails if the session was closed by the router or the peer failed. Succeeds if the connection
/// was only dropped, in which case the operation may wait for the next session.
pub(crate) async fn session_lost(
    status_rx: &mut watch::Receiver<SessionStatus>,
    generation: u64,
) -> Result<()> {
    loop {
        let status = status_rx.borrow_and_update().clone();
        match status {
            SessionStatus::Established(session) if session.generation == generation => (),
            SessionStatus::Closed {
                generation: closed,
                error,
            } if closed == generation => return Err(error.into_error()),
            SessionStatus::Failed(err) => return Err(err.into_error()),
            _ => return Ok(()),
        }
        if status_rx.changed().await.is_err() {
            return Err(PeerClosedError.into());
        }
    }
}

/// Input from the connection supervisor.
#[derive(Debug)]
pub(crate) enum SessionInput {
    Opened { generation: u64 },
    Message { generation: u64, message: Message },
    Disconnected { generation: u64 },
    Failed(ChannelTransmittableError),
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Connecting,
    HelloSent,
    Challenging,
    Welcomed,
    Closed,
}

pub(crate) type SharedChallengeHandler = Arc<Mutex<Option<Arc<dyn ChallengeHandler>>>>;

type PendingSignature = Option<(u64, BoxFuture<'static, Result<String>>)>;

/// Drives the WAMP handshake for every connection generation and publishes the session status.
pub(crate) struct SessionManager {
    pub name: String,
    pub realm: Uri,
    pub hello_details: Dictionary,
    pub challenge_handler: SharedChallengeHandler,
    pub input_rx: UnboundedReceiver<SessionInput>,
    pub status_tx: watch::Sender<SessionStatus>,
    pub closed_tx: broadcast::Sender<SessionClosedError>,
    pub outbound_tx: UnboundedSender<OutboundMessage>,
    pub command_tx: UnboundedSender<SupervisorCommand>,
}

impl SessionManager {
    pub async fn run(mut self) {
        let mut state = HandshakeState::Connecting;
        let mut generation = 0;
        let mut pending_signature: PendingSignature = None;
        loop {
            tokio::select! {
                input = self.input_rx.recv() => {
                    let input = match input {
                        Some(input) => input,
                        None => break,
                    };
                    match input {
                        SessionInput::Opened { generation: opened } => {
                            generation = opened;
                            pending_signature = None;
                            state = self.send_hello(generation);
                        }
                        SessionInput::Message { generation: received, message } => {
                            if received != generation {
                                debug!("Peer {} dropped {} from stale connection generation {received}", self.name, message.message_name());
                                continue;
                            }
                            state = self.handle_message(state, generation, message, &mut pending_signature).await;
                        }
                        SessionInput::Disconnected { generation: disconnected } => {
                            if disconnected != generation {
                                continue;
                            }
                            pending_signature = None;
                            // A close stays visible, so operations on the closed session fail instead of
                            // waiting for the next one.
                            if state != HandshakeState::Closed {
                                self.status_tx.send_replace(SessionStatus::Disconnected);
                            }
                            state = HandshakeState::Connecting;
                        }
                        SessionInput::Failed(err) => {
                            error!("Peer {} failed: {}", self.name, err.clone().into_error());
                            self.status_tx.send_replace(SessionStatus::Failed(err));
                        }
                        SessionInput::Stopped => break,
                    }
                }
                (signed, signature) = Self::wait_for_signature(&mut pending_signature), if pending_signature.is_some() => {
                    if signed == generation && state == HandshakeState::Challenging {
                        state = self.send_signature(generation, signature);
                    }
                }
            }
        }

        let status = self.status_tx.borrow().clone();
        if !matches!(status, SessionStatus::Failed(_)) {
            self.status_tx
                .send_replace(SessionStatus::Failed(ChannelTransmittableError::Closed));
        }
        info!("Session manager for peer {} stopped", self.name);
    }

    async fn wait_for_signature(pending: &mut PendingSignature) -> (u64, Result<String>) {
        match pending {
            Some((generation, signature)) => {
                let generation = *generation;
                let signature = signature.await;
                *pending = None;
                (generation, signature)
            }
            None => std::future::pending().await,
        }
    }

    fn send(&self, generation: u64, message: Message) {
        self.outbound_tx
            .send(OutboundMessage {
                generation,
                message,
                route: None,
            })
            .ok();
    }

    fn send_hello(&self, generation: u64) -> HandshakeState {
        info!(
            "Peer {} joining realm {} on connection generation {generation}",
            self.name, self.realm
        );
        self.send(
            generation,
            Message::Hello(HelloMessage {
                realm: self.realm.clone(),
                details: self.hello_details.clone(),
            }),
        );
        HandshakeState::HelloSent
    }

    fn send_signature(&self, generation: u64, signature: Result<String>) -> HandshakeState {
        match signature {
            Ok(signature) => {
                self.send(
                    generation,
                    Message::Authenticate(AuthenticateMessage {
                        signature,
                        extra: Dictionary::default(),
                    }),
                );
                HandshakeState::Challenging
            }
            Err(err) => self.fail_challenge(generation, err),
        }
    }

    fn fail_challenge(&self, generation: u64, err: Error) -> HandshakeState {
        warn!(
            "Peer {} failed to answer authentication challenge: {err:#}",
            self.name
        );
        self.send(generation, abort_message_for_challenge_error(&err));
        self.close(
            generation,
            ChannelTransmittableError::Challenge(format!("{err:#}")),
        )
    }

    fn protocol_violation(&self, generation: u64, err: Error) -> HandshakeState {
        warn!("Peer {} aborting session: {err}", self.name);
        self.send(generation, abort_message_for_protocol_violation(&err));
        self.close(
            generation,
            ChannelTransmittableError::Session(SessionClosedError {
                reason: Uri::from_known(PROTOCOL_VIOLATION),
                message: err.to_string(),
            }),
        )
    }

    fn closed_by_router(&self, generation: u64, err: SessionClosedError) -> HandshakeState {
        self.closed_tx.send(err.clone()).ok();
        self.close(generation, ChannelTransmittableError::Session(err))
    }

    fn close(&self, generation: u64, error: ChannelTransmittableError) -> HandshakeState {
        info!(
            "Peer {} session on connection generation {generation} closed: {}",
            self.name,
            error.clone().into_error()
        );
        self.status_tx
            .send_replace(SessionStatus::Closed { generation, error });
        self.command_tx
            .send(SupervisorCommand::Recycle { generation })
            .ok();
        HandshakeState::Closed
    }

    async fn handle_message(
        &self,
        state: HandshakeState,
        generation: u64,
        message: Message,
        pending_signature: &mut PendingSignature,
    ) -> HandshakeState {
        match (state, message) {
            (HandshakeState::HelloSent | HandshakeState::Challenging, Message::Welcome(message)) => {
                let session = Session {
                    id: message.session,
                    realm: self.realm.clone(),
                    generation,
                    details: message.details,
                };
                info!(
                    "Peer {} established session {} in realm {}",
                    self.name, session.id, session.realm
                );
                self.status_tx
                    .send_replace(SessionStatus::Established(session));
                HandshakeState::Welcomed
            }
            (
                HandshakeState::HelloSent | HandshakeState::Challenging,
                Message::Challenge(message),
            ) => {
                let handler = self.challenge_handler.lock().await.clone();
                match handler {
                    Some(handler) => {
                        let challenge = Challenge::from(message);
                        debug!(
                            "Peer {} received {} challenge",
                            self.name, challenge.auth_method
                        );
                        *pending_signature = Some((
                            generation,
                            async move { handler.respond(challenge).await }.boxed(),
                        ));
                        HandshakeState::Challenging
                    }
                    None => self.fail_challenge(
                        generation,
                        Error::msg("no challenge handler is registered"),
                    ),
                }
            }
            (HandshakeState::Closed, message) => {
                debug!(
                    "Peer {} ignored {} after session closed",
                    self.name,
                    message.message_name()
                );
                HandshakeState::Closed
            }
            (_, Message::Abort(message)) => {
                *pending_signature = None;
                self.closed_by_router(generation, SessionClosedError::from(&message))
            }
            (HandshakeState::Welcomed, Message::Goodbye(message)) => {
                self.send(generation, goodbye_and_out());
                self.closed_by_router(generation, SessionClosedError::from(&message))
            }
            (state, message) => self.protocol_violation(
                generation,
                Error::msg(format!(
                    "received {} message in {state:?} state",
                    message.message_name()
                )),
            ),
        }
    }
}
