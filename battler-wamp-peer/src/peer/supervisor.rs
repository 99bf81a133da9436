use std::sync::Arc;

use anyhow::Result;
use futures_util::{
    FutureExt,
    SinkExt,
    StreamExt,
    future::BoxFuture,
};
use log::{
    debug,
    error,
    info,
    warn,
};
use tokio::sync::mpsc::{
    UnboundedReceiver,
    UnboundedSender,
};

use crate::{
    core::{
        backoff::ReconnectPolicy,
        clock::Clock,
        error::{
            ChannelTransmittableError,
            PeerConnectionError,
        },
        stream::{
            MessageStream,
            StreamMessage,
        },
    },
    message::message::Message,
    peer::{
        connector::{
            Connection,
            Connector,
        },
        dispatcher::{
            Dispatch,
            Dispatcher,
            RouteKey,
        },
        session::SessionInput,
    },
    serializer::serializer::new_serializer,
};

/// A message to write on the connection.
#[derive(Debug)]
pub(crate) struct OutboundMessage {
    /// The connection generation the message was minted for.
    pub generation: u64,
    pub message: Message,
    /// A route to install before the message is written.
    pub route: Option<(RouteKey, UnboundedSender<Message>)>,
}

/// A command for the connection supervisor.
#[derive(Debug)]
pub(crate) enum SupervisorCommand {
    Acquire,
    Release,
    /// Closes the given generation and dials a new one.
    Recycle { generation: u64 },
    Shutdown { farewell: Option<Message> },
}

/// A claim on the supervised connection.
///
/// The connection is opened while at least one lease is alive.
#[derive(Debug)]
pub struct ConnectionLease {
    command_tx: UnboundedSender<SupervisorCommand>,
}

impl ConnectionLease {
    pub(crate) fn new(command_tx: UnboundedSender<SupervisorCommand>) -> Self {
        command_tx.send(SupervisorCommand::Acquire).ok();
        Self { command_tx }
    }
}

impl Clone for ConnectionLease {
    fn clone(&self) -> Self {
        Self::new(self.command_tx.clone())
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.command_tx.send(SupervisorCommand::Release).ok();
    }
}

enum Phase {
    Idle,
    Dialing(BoxFuture<'static, Result<Connection>>),
    Backoff(BoxFuture<'static, ()>),
    Open(MessageStream),
    Failed,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dialing(_) => "dialing",
            Self::Backoff(_) => "backoff",
            Self::Open(_) => "open",
            Self::Failed => "failed",
        }
    }
}

enum Event {
    Command(Option<SupervisorCommand>),
    Outbound(Option<OutboundMessage>),
    Dialed(Result<Connection>),
    BackoffElapsed,
    Inbound(Option<Result<StreamMessage>>),
}

/// Owns the router connection, dialing it while leases exist and redialing it when lost.
pub(crate) struct Supervisor {
    pub name: String,
    pub url: String,
    pub connector: Arc<dyn Connector>,
    pub clock: Arc<dyn Clock>,
    pub policy: ReconnectPolicy,
    pub command_rx: UnboundedReceiver<SupervisorCommand>,
    pub outbound_rx: UnboundedReceiver<OutboundMessage>,
    pub session_tx: UnboundedSender<SessionInput>,
}

struct SupervisorState {
    phase: Phase,
    dispatcher: Dispatcher,
    leases: usize,
    generation: u64,
}

impl Supervisor {
    pub async fn run(mut self) {
        let mut state = SupervisorState {
            phase: Phase::Idle,
            dispatcher: Dispatcher::default(),
            leases: 0,
            generation: 0,
        };
        loop {
            let event = self.next_event(&mut state.phase).await;
            let done = match event {
                Event::Command(None) => {
                    self.shutdown(&mut state, None).await;
                    true
                }
                Event::Command(Some(command)) => self.handle_command(&mut state, command).await,
                Event::Outbound(Some(message)) => {
                    self.write(&mut state, message).await;
                    false
                }
                Event::Outbound(None) => {
                    self.shutdown(&mut state, None).await;
                    true
                }
                Event::Dialed(result) => {
                    self.dialed(&mut state, result);
                    false
                }
                Event::BackoffElapsed => {
                    state.phase = self.dial();
                    false
                }
                Event::Inbound(message) => {
                    self.handle_inbound(&mut state, message).await;
                    false
                }
            };
            if done {
                break;
            }
        }
        self.session_tx.send(SessionInput::Stopped).ok();
        info!("Connection supervisor for peer {} stopped", self.name);
    }

    async fn next_event(&mut self, phase: &mut Phase) -> Event {
        match phase {
            Phase::Idle | Phase::Failed => tokio::select! {
                command = self.command_rx.recv() => Event::Command(command),
                message = self.outbound_rx.recv() => Event::Outbound(message),
            },
            Phase::Dialing(dial) => tokio::select! {
                command = self.command_rx.recv() => Event::Command(command),
                message = self.outbound_rx.recv() => Event::Outbound(message),
                result = dial => Event::Dialed(result),
            },
            Phase::Backoff(backoff) => tokio::select! {
                command = self.command_rx.recv() => Event::Command(command),
                message = self.outbound_rx.recv() => Event::Outbound(message),
                _ = backoff => Event::BackoffElapsed,
            },
            Phase::Open(stream) => tokio::select! {
                command = self.command_rx.recv() => Event::Command(command),
                message = self.outbound_rx.recv() => Event::Outbound(message),
                message = stream.next() => Event::Inbound(message),
            },
        }
    }

    fn dial(&self) -> Phase {
        info!("Peer {} dialing {}", self.name, self.url);
        let connector = self.connector.clone();
        let url = self.url.clone();
        Phase::Dialing(async move { connector.connect(&url).await }.boxed())
    }

    async fn handle_command(
        &mut self,
        state: &mut SupervisorState,
        command: SupervisorCommand,
    ) -> bool {
        match command {
            SupervisorCommand::Acquire => {
                state.leases += 1;
                if state.leases == 1 && matches!(state.phase, Phase::Idle) {
                    state.phase = self.dial();
                }
            }
            SupervisorCommand::Release => {
                state.leases = state.leases.saturating_sub(1);
                if state.leases == 0 {
                    debug!("Peer {} released its last connection lease", self.name);
                    match state.phase {
                        Phase::Open(_) => {
                            // Teardown frames are queued before the lease that guarded them.
                            self.flush_outbound(state).await;
                            self.close(state).await;
                            self.disconnected(state);
                            state.phase = Phase::Idle;
                        }
                        Phase::Dialing(_) | Phase::Backoff(_) => {
                            self.policy.reset();
                            state.phase = Phase::Idle;
                        }
                        Phase::Idle | Phase::Failed => (),
                    }
                }
            }
            SupervisorCommand::Recycle { generation } => {
                if generation == state.generation && matches!(state.phase, Phase::Open(_)) {
                    info!(
                        "Peer {} recycling connection generation {generation}",
                        self.name
                    );
                    self.flush_outbound(state).await;
                    self.close(state).await;
                    self.lost(state);
                }
            }
            SupervisorCommand::Shutdown { farewell } => {
                self.shutdown(state, farewell).await;
                return true;
            }
        }
        false
    }

    fn dialed(&mut self, state: &mut SupervisorState, result: Result<Connection>) {
        match result {
            Ok(connection) => {
                state.generation += 1;
                self.policy.reset();
                info!(
                    "Peer {} opened connection generation {} to {}",
                    self.name, state.generation, self.url
                );
                state.phase = Phase::Open(MessageStream::new(
                    connection.transport,
                    new_serializer(connection.serializer),
                ));
                self.session_tx
                    .send(SessionInput::Opened {
                        generation: state.generation,
                    })
                    .ok();
            }
            Err(err) => {
                warn!("Peer {} failed to connect to {}: {err:#}", self.name, self.url);
                self.retry(state, format!("{err:#}"));
            }
        }
    }

    async fn write(&mut self, state: &mut SupervisorState, message: OutboundMessage) {
        let stream = match &mut state.phase {
            Phase::Open(stream) if message.generation == state.generation => stream,
            phase => {
                debug!(
                    "Peer {} dropped {} minted for connection generation {} while {} on generation {}",
                    self.name,
                    message.message.message_name(),
                    message.generation,
                    phase.name(),
                    state.generation,
                );
                return;
            }
        };
        if let Some((key, tx)) = message.route {
            state.dispatcher.install(key, tx);
        }
        state.dispatcher.observe_outbound(&message.message);
        let message_name = message.message.message_name();
        debug!("Peer {} sending {message_name} message", self.name);
        if let Err(err) = stream.send(StreamMessage::Message(message.message)).await {
            warn!(
                "Peer {} failed to send {message_name} message: {err:#}",
                self.name
            );
            self.close(state).await;
            self.lost(state);
        }
    }

    async fn flush_outbound(&mut self, state: &mut SupervisorState) {
        while let Ok(message) = self.outbound_rx.try_recv() {
            self.write(state, message).await;
        }
    }

    async fn handle_inbound(
        &mut self,
        state: &mut SupervisorState,
        message: Option<Result<StreamMessage>>,
    ) {
        match message {
            Some(Ok(StreamMessage::Message(message))) => {
                debug!("Peer {} received {} message", self.name, message.message_name());
                match state.dispatcher.dispatch(message) {
                    Dispatch::Session(message) => {
                        self.session_tx
                            .send(SessionInput::Message {
                                generation: state.generation,
                                message,
                            })
                            .ok();
                    }
                    Dispatch::Delivered => (),
                    Dispatch::Unrouted(message) => {
                        debug!(
                            "Peer {} has no route for {} message",
                            self.name,
                            message.message_name()
                        );
                    }
                }
            }
            Some(Ok(StreamMessage::Ping(data))) => {
                if let Phase::Open(stream) = &mut state.phase {
                    if let Err(err) = stream.send(StreamMessage::Ping(data)).await {
                        warn!("Peer {} failed to answer ping: {err:#}", self.name);
                    }
                }
            }
            Some(Ok(StreamMessage::Invalid(err))) => {
                warn!(
                    "Peer {} skipped invalid message on connection generation {}: {err:#}",
                    self.name, state.generation
                );
            }
            Some(Err(err)) => {
                warn!(
                    "Peer {} lost connection generation {}: {err:#}",
                    self.name, state.generation
                );
                self.lost(state);
            }
            None => {
                info!(
                    "Peer {} connection generation {} closed by the router",
                    self.name, state.generation
                );
                self.lost(state);
            }
        }
    }

    async fn close(&self, state: &mut SupervisorState) {
        if let Phase::Open(stream) = &mut state.phase {
            if let Err(err) = stream.close().await {
                debug!("Peer {} failed to close connection cleanly: {err:#}", self.name);
            }
        }
    }

    fn disconnected(&self, state: &mut SupervisorState) {
        debug!(
            "Peer {} dropping {} route(s) of connection generation {}",
            self.name,
            state.dispatcher.len(),
            state.generation
        );
        state.dispatcher.reset();
        self.session_tx
            .send(SessionInput::Disconnected {
                generation: state.generation,
            })
            .ok();
    }

    fn lost(&mut self, state: &mut SupervisorState) {
        self.disconnected(state);
        if state.leases == 0 {
            state.phase = Phase::Idle;
            return;
        }
        self.retry(state, "connection lost".to_owned());
    }

    fn retry(&mut self, state: &mut SupervisorState, msg: String) {
        match self.policy.next_delay() {
            Some(delay) => {
                info!(
                    "Peer {} reconnecting in {}ms (attempt {})",
                    self.name,
                    delay.as_millis(),
                    self.policy.attempts()
                );
                state.phase = Phase::Backoff(self.clock.sleep(delay));
            }
            None => {
                let err = PeerConnectionError {
                    url: self.url.clone(),
                    attempts: self.policy.attempts(),
                    msg,
                };
                error!("Peer {}: {err}", self.name);
                self.session_tx
                    .send(SessionInput::Failed(ChannelTransmittableError::Connection {
                        url: err.url,
                        attempts: err.attempts,
                        msg: err.msg,
                    }))
                    .ok();
                state.phase = Phase::Failed;
            }
        }
    }

    async fn shutdown(&mut self, state: &mut SupervisorState, farewell: Option<Message>) {
        if let Phase::Open(stream) = &mut state.phase {
            if let Some(farewell) = farewell {
                if let Err(err) = stream.send(StreamMessage::Message(farewell)).await {
                    debug!("Peer {} failed to say goodbye: {err:#}", self.name);
                }
            }
        }
        self.close(state).await;
        if matches!(state.phase, Phase::Open(_)) {
            self.disconnected(state);
        } else {
            state.dispatcher.reset();
        }
        state.phase = Phase::Idle;
    }
}
