use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task,
};

use ahash::HashMap;
use anyhow::Result;
use async_trait::async_trait;
use battler_wamp_values::{
    Dictionary,
    List,
    Value,
};
use futures_util::{
    Stream,
    StreamExt,
    stream::BoxStream,
};
use log::{
    debug,
    info,
};
use tokio::{
    sync::{
        mpsc::{
            UnboundedReceiver,
            UnboundedSender,
            unbounded_channel,
        },
        oneshot,
    },
    task::JoinHandle,
};

use crate::{
    core::{
        error::WampError,
        id::{
            Id,
            next_request_id,
        },
        invocation_policy::InvocationPolicy,
        match_style::MatchStyle,
        uri::Uri,
    },
    message::{
        common::invocation_error,
        message::{
            InvocationMessage,
            Message,
            RegisterMessage,
            UnregisterMessage,
            YieldMessage,
        },
    },
    peer::{
        context::PeerContext,
        dispatcher::RouteKey,
        session::{
            Session,
            session_lost,
            wait_for_session,
        },
    },
};

/// Options for registering a procedure.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcedureOptions {
    /// How the procedure should be matched for procedure calls.
    pub match_style: Option<MatchStyle>,
    /// How a callee should be selected for invocations.
    pub invocation_policy: InvocationPolicy,
    /// The caller's identity should be disclosed.
    pub disclose_caller: bool,
    /// Additional options sent as-is.
    pub extra: Dictionary,
}

impl ProcedureOptions {
    fn into_dictionary(self) -> Dictionary {
        let mut options = self.extra;
        if let Some(match_style) = self.match_style {
            options.insert("match".to_owned(), Value::String(match_style.into()));
        }
        if self.invocation_policy != InvocationPolicy::Single {
            options.insert(
                "invoke".to_owned(),
                Value::String(self.invocation_policy.into()),
            );
        }
        if self.disclose_caller {
            options.insert("disclose_caller".to_owned(), Value::Bool(true));
        }
        options
    }
}

/// An invocation of a registered procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub request: Id,
    pub registration: Id,
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    pub details: Dictionary,
    /// The INVOCATION message as received.
    pub message: InvocationMessage,
}

impl Invocation {
    /// The procedure actually called, for pattern-based registrations.
    pub fn procedure(&self) -> Option<Uri> {
        self.details
            .get("procedure")
            .and_then(Value::string)
            .and_then(|procedure| Uri::try_from(procedure).ok())
    }

    /// The caller's session ID, if disclosed.
    pub fn caller(&self) -> Option<Id> {
        self.details
            .get("caller")
            .and_then(Value::integer)
            .and_then(|caller| Id::try_from(caller).ok())
    }
}

impl From<InvocationMessage> for Invocation {
    fn from(value: InvocationMessage) -> Self {
        Self {
            request: value.request,
            registration: value.registered_registration,
            arguments: value.call_arguments.clone(),
            arguments_keyword: value.call_arguments_keyword.clone(),
            details: value.details.clone(),
            message: value,
        }
    }
}

/// A value yielded by a procedure.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RpcYield {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// The output of a procedure invocation.
pub enum ProcedureOutput {
    Value(RpcYield),
    /// A stream of values.
    ///
    /// A progressive registration yields every value. Otherwise, only the first value is yielded.
    Stream(BoxStream<'static, Result<RpcYield>>),
}

impl ProcedureOutput {
    fn into_stream(self) -> BoxStream<'static, Result<RpcYield>> {
        match self {
            Self::Value(value) => futures_util::stream::once(async move { Ok(value) }).boxed(),
            Self::Stream(stream) => stream,
        }
    }
}

/// A procedure handler.
///
/// An error is reported to the caller. The registration stays alive.
#[async_trait]
pub trait Procedure: Send + Sync {
    async fn invoke(&self, invocation: Invocation) -> Result<ProcedureOutput>;
}

#[async_trait]
impl<F, Fut> Procedure for F
where
    F: Fn(Invocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProcedureOutput>> + Send,
{
    async fn invoke(&self, invocation: Invocation) -> Result<ProcedureOutput> {
        self(invocation).await
    }
}

/// An event in the lifecycle of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// The procedure was registered, on the first or a later session.
    Registered { registration_id: Id },
}

fn yield_message(request: Id, value: RpcYield, progress: Option<bool>) -> Message {
    let mut options = Dictionary::default();
    if let Some(progress) = progress {
        options.insert("progress".to_owned(), Value::Bool(progress));
    }
    Message::Yield(YieldMessage {
        invocation_request: request,
        options,
        arguments: value.arguments,
        arguments_keyword: value.arguments_keyword,
    })
}

async fn respond(
    context: &PeerContext,
    handler: Arc<dyn Procedure>,
    progressive: bool,
    generation: u64,
    message: InvocationMessage,
) -> Result<()> {
    let request = message.request;
    let mut stream = handler.invoke(Invocation::from(message)).await?.into_stream();
    if !progressive {
        let value = match stream.next().await {
            Some(value) => value?,
            None => RpcYield::default(),
        };
        return context.send(generation, yield_message(request, value, None));
    }
    while let Some(value) = stream.next().await {
        context.send(generation, yield_message(request, value?, Some(true)))?;
    }
    context.send(
        generation,
        yield_message(request, RpcYield::default(), Some(false)),
    )
}

enum Outcome {
    Done,
    Lost,
}

struct RegistrationTask {
    context: Arc<PeerContext>,
    procedure: Uri,
    options: Dictionary,
    progressive: bool,
    handler: Arc<dyn Procedure>,
    event_tx: UnboundedSender<Result<RegistrationEvent>>,
    stop_rx: oneshot::Receiver<()>,
    invocations: HashMap<Id, JoinHandle<()>>,
}

impl RegistrationTask {
    async fn run(mut self) {
        let _lease = self.context.lease();
        let mut status_rx = self.context.status_rx();
        let mut after = None;
        loop {
            let session = tokio::select! {
                biased;
                _ = &mut self.stop_rx => return,
                session = wait_for_session(&mut status_rx, after) => session,
            };
            let session = match session {
                Ok(session) => session,
                Err(err) => {
                    self.event_tx.send(Err(err)).ok();
                    return;
                }
            };
            let outcome = self.register(&session).await;
            self.abort_invocations();
            if let Outcome::Done = outcome {
                return;
            }
            if let Err(err) = session_lost(&mut status_rx, session.generation).await {
                self.event_tx.send(Err(err)).ok();
                return;
            }
            after = Some(session.generation);
        }
    }

    async fn register(&mut self, session: &Session) -> Outcome {
        let request = next_request_id();
        let message = Message::Register(RegisterMessage {
            request,
            options: self.options.clone(),
            procedure: self.procedure.clone(),
        });
        let mut message_rx =
            match self
                .context
                .send_routed(session, message, RouteKey::Request(request))
            {
                Ok(message_rx) => message_rx,
                Err(err) => {
                    self.event_tx.send(Err(err)).ok();
                    return Outcome::Done;
                }
            };

        let mut registration = None;
        loop {
            tokio::select! {
                biased;
                message = message_rx.recv() => match message {
                    Some(Message::Registered(message)) => {
                        info!(
                            "Peer {} registered {} as {}",
                            self.context.name, self.procedure, message.registration
                        );
                        registration = Some(message.registration);
                        self.event_tx
                            .send(Ok(RegistrationEvent::Registered {
                                registration_id: message.registration,
                            }))
                            .ok();
                    }
                    Some(Message::Error(message)) => {
                        self.event_tx
                            .send(Err(WampError::from_message(message, self.procedure.clone()).into()))
                            .ok();
                        return Outcome::Done;
                    }
                    Some(Message::Invocation(message)) => {
                        self.invoke(session.generation, message);
                    }
                    Some(Message::Interrupt(message)) => {
                        if let Some(invocation) = self.invocations.remove(&message.invocation_request) {
                            debug!(
                                "Peer {} interrupted invocation {} of {}",
                                self.context.name, message.invocation_request, self.procedure
                            );
                            invocation.abort();
                        }
                    }
                    Some(Message::Unregistered(message)) => {
                        if message.revoked_registration().is_some() {
                            info!(
                                "Registration of {} was revoked by the router",
                                self.procedure
                            );
                            return Outcome::Done;
                        }
                    }
                    Some(message) => {
                        debug!(
                            "Peer {} ignored {} message for registration of {}",
                            self.context.name,
                            message.message_name(),
                            self.procedure
                        );
                    }
                    None => return Outcome::Lost,
                },
                _ = &mut self.stop_rx => {
                    self.unregister(session, registration, message_rx).await;
                    return Outcome::Done;
                }
            }
        }
    }

    fn invoke(&mut self, generation: u64, message: InvocationMessage) {
        self.invocations
            .retain(|_, invocation| !invocation.is_finished());
        let request = message.request;
        let context = self.context.clone();
        let handler = self.handler.clone();
        let progressive = self.progressive;
        let invocation = tokio::spawn(async move {
            if let Err(err) = respond(&context, handler, progressive, generation, message).await {
                debug!(
                    "Peer {} failed invocation {request}: {err:#}",
                    context.name
                );
                context
                    .send(generation, invocation_error(request, &err))
                    .ok();
            }
        });
        self.invocations.insert(request, invocation);
    }

    fn abort_invocations(&mut self) {
        for (_, invocation) in self.invocations.drain() {
            invocation.abort();
        }
    }

    async fn unregister(
        &self,
        session: &Session,
        registration: Option<Id>,
        mut message_rx: UnboundedReceiver<Message>,
    ) {
        let registration = match registration {
            Some(registration) => Some(registration),
            None => {
                // The router may still confirm the registration, which must then be undone.
                let confirmation = async {
                    while let Some(message) = message_rx.recv().await {
                        match message {
                            Message::Registered(message) => return Some(message.registration),
                            Message::Error(_) => return None,
                            _ => (),
                        }
                    }
                    None
                };
                tokio::select! {
                    registration = confirmation => registration,
                    _ = self.context.clock.sleep(self.context.call_timeout) => None,
                }
            }
        };
        if let Some(registration) = registration {
            info!(
                "Peer {} unregistering {} ({registration})",
                self.context.name, self.procedure
            );
            self.context
                .send(
                    session.generation,
                    Message::Unregister(UnregisterMessage {
                        request: next_request_id(),
                        registered_registration: registration,
                    }),
                )
                .ok();
        }
    }
}

/// A procedure registration.
///
/// A stream of [`RegistrationEvent`]s, ending when the router revokes the registration or rejects
/// it. Dropping the registration unregisters the procedure.
pub struct Registration {
    event_rx: UnboundedReceiver<Result<RegistrationEvent>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl Registration {
    pub(crate) fn new(
        context: Arc<PeerContext>,
        procedure: Uri,
        options: Dictionary,
        progressive: bool,
        handler: Arc<dyn Procedure>,
    ) -> Self {
        let (event_tx, event_rx) = unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(
            RegistrationTask {
                context,
                procedure,
                options,
                progressive,
                handler,
                event_tx,
                stop_rx,
                invocations: HashMap::default(),
            }
            .run(),
        );
        Self {
            event_rx,
            stop_tx: Some(stop_tx),
        }
    }

    /// Waits for the procedure to be registered, returning the registration ID.
    pub async fn registered(&mut self) -> Result<Id> {
        match self.next().await {
            Some(Ok(RegistrationEvent::Registered { registration_id })) => Ok(registration_id),
            Some(Err(err)) => Err(err),
            None => Err(anyhow::Error::msg("registration ended before it was confirmed")),
        }
    }

    /// Unregisters the procedure.
    pub fn cancel(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            stop_tx.send(()).ok();
        }
    }
}

impl Stream for Registration {
    type Item = Result<RegistrationEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.event_rx.poll_recv(cx)
    }
}

pub(crate) fn registration_options(options: ProcedureOptions, progressive: bool) -> Dictionary {
    let mut options = options.into_dictionary();
    if progressive {
        options.insert("progress".to_owned(), Value::Bool(true));
        options.insert(
            "replace_orphaned_session".to_owned(),
            Value::String("yes".to_owned()),
        );
        options.insert("force_reregister".to_owned(), Value::Bool(true));
    }
    options
}

#[cfg(test)]
mod registration_test {
    use battler_wamp_values::{
        Dictionary,
        Value,
    };

    use crate::{
        core::{
            invocation_policy::InvocationPolicy,
            match_style::MatchStyle,
        },
        peer::registration::{
            ProcedureOptions,
            registration_options,
        },
    };

    #[test]
    fn default_options_are_empty() {
        assert_eq!(
            registration_options(ProcedureOptions::default(), false),
            Dictionary::default()
        );
    }

    #[test]
    fn writes_procedure_options() {
        let options = registration_options(
            ProcedureOptions {
                match_style: Some(MatchStyle::Prefix),
                invocation_policy: InvocationPolicy::RoundRobin,
                disclose_caller: true,
                extra: Dictionary::from_iter([("x_custom".to_owned(), Value::Integer(1))]),
            },
            false,
        );
        pretty_assertions::assert_eq!(
            options,
            Dictionary::from_iter([
                ("match".to_owned(), Value::String("prefix".to_owned())),
                ("invoke".to_owned(), Value::String("roundrobin".to_owned())),
                ("disclose_caller".to_owned(), Value::Bool(true)),
                ("x_custom".to_owned(), Value::Integer(1)),
            ])
        );
    }

    #[test]
    fn progressive_registration_replaces_orphaned_sessions() {
        let options = registration_options(ProcedureOptions::default(), true);
        pretty_assertions::assert_eq!(
            options,
            Dictionary::from_iter([
                ("progress".to_owned(), Value::Bool(true)),
                (
                    "replace_orphaned_session".to_owned(),
                    Value::String("yes".to_owned())
                ),
                ("force_reregister".to_owned(), Value::Bool(true)),
            ])
        );
    }
}
