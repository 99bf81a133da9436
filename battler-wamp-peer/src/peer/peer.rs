use std::{
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::Duration,
};

use ahash::{
    HashMap,
    HashSet,
};
use anyhow::{
    Error,
    Result,
};
use battler_wamp_values::{
    Dictionary,
    Value,
};
use futures_util::{
    Stream,
    StreamExt,
    lock::Mutex,
};
use log::info;
use tokio::{
    sync::{
        broadcast,
        mpsc::unbounded_channel,
        watch,
    },
    task::JoinHandle,
};

use crate::{
    auth::ChallengeHandler,
    core::{
        backoff::{
            ReconnectConfig,
            ReconnectPolicy,
        },
        clock::{
            Clock,
            TokioClock,
        },
        close::CloseReason,
        error::SessionClosedError,
        roles::{
            PeerRole,
            roles_dictionary,
        },
        uri::Uri,
    },
    message::common::goodbye_with_close_reason,
    peer::{
        call::{
            PendingCall,
            ProgressivePendingCall,
            RpcCall,
            RpcResult,
        },
        connector::{
            Connector,
            WebSocketConnector,
        },
        context::PeerContext,
        publication::{
            Publication,
            PublishOptions,
            PublishedEvent,
        },
        registration::{
            Procedure,
            ProcedureOptions,
            Registration,
            registration_options,
        },
        session::{
            Session,
            SessionManager,
            SessionStatus,
            SharedChallengeHandler,
            wait_for_session,
        },
        subscription::{
            Subscription,
            SubscriptionOptions,
        },
        supervisor::{
            ConnectionLease,
            Supervisor,
            SupervisorCommand,
        },
    },
    serializer::serializer::SerializerType,
};

const DEFAULT_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// Configuration for WebSocket-specific WAMP connections.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConfig {
    /// Additional headers to include in the WebSocket handshake request.
    pub headers: HashMap<String, String>,
}

/// Identity announced in HELLO for challenge-response authentication.
#[derive(Debug, Default, Clone)]
pub struct AuthConfig {
    pub id: Option<String>,
    /// Authentication methods the peer is willing to perform, such as `wampcra`.
    pub methods: Vec<String>,
}

/// Configuration for a [`Peer`].
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Name of the peer, mostly for logging.
    pub name: String,
    /// Agent name, communicated to the router.
    pub agent: String,
    /// Roles implemented by the peer.
    pub roles: HashSet<PeerRole>,
    /// Allowed serializers.
    ///
    /// The actual serializer will be selected when the connection with the router is established.
    pub serializers: HashSet<SerializerType>,
    /// Additional configuration for WebSocket-specific connections.
    pub web_socket: Option<WebSocketConfig>,
    pub auth: Option<AuthConfig>,
    /// Additional details sent in HELLO.
    pub hello_details: Dictionary,
    /// Default timeout for procedure calls.
    pub call_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl PeerConfig {
    fn validate(&self) -> Result<()> {
        if self.serializers.is_empty() {
            return Err(Error::msg("at least one serializer is required"));
        }
        if self.roles.is_empty() {
            return Err(Error::msg("at least one role is required"));
        }
        if self.call_timeout.is_zero() {
            return Err(Error::msg("call timeout must be positive"));
        }
        self.reconnect.validate()
    }

    fn hello_details(&self) -> Result<Dictionary> {
        let mut details = Dictionary::default();
        details.insert("agent".to_owned(), Value::String(self.agent.clone()));
        details.insert(
            "roles".to_owned(),
            Value::Dictionary(roles_dictionary(&self.roles)?),
        );
        if let Some(auth) = &self.auth {
            if !auth.methods.is_empty() {
                details.insert(
                    "authmethods".to_owned(),
                    Value::List(auth.methods.iter().cloned().map(Value::String).collect()),
                );
            }
            if let Some(id) = &auth.id {
                details.insert("authid".to_owned(), Value::String(id.clone()));
            }
        }
        details.extend(self.hello_details.clone());
        Ok(details)
    }

    fn preferred_serializers(&self) -> Vec<SerializerType> {
        [SerializerType::Json, SerializerType::MessagePack]
            .into_iter()
            .filter(|serializer| self.serializers.contains(serializer))
            .collect()
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_AGENT.to_owned(),
            agent: DEFAULT_AGENT.to_owned(),
            roles: HashSet::from_iter([
                PeerRole::Callee,
                PeerRole::Caller,
                PeerRole::Publisher,
                PeerRole::Subscriber,
            ]),
            serializers: HashSet::from_iter([SerializerType::Json, SerializerType::MessagePack]),
            web_socket: None,
            auth: None,
            hello_details: Dictionary::default(),
            call_timeout: Duration::from_secs(300),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// A WAMP peer, joined to a single realm over a supervised connection to a router.
///
/// The connection is opened lazily, while at least one operation or [`ConnectionLease`] is alive,
/// and reopened with exponential backoff when lost.
pub struct Peer {
    context: Arc<PeerContext>,
    challenge_handler: SharedChallengeHandler,
    closed_tx: broadcast::Sender<SessionClosedError>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Peer {
    /// Creates a new peer for a WebSocket router.
    pub fn connect(url: &str, realm: &str, config: PeerConfig) -> Result<Self> {
        let connector = WebSocketConnector::new(
            config.agent.clone(),
            config.preferred_serializers(),
            config
                .web_socket
                .as_ref()
                .map(|web_socket| web_socket.headers.clone())
                .unwrap_or_default(),
        );
        Self::new(url, realm, config, Arc::new(connector), Arc::new(TokioClock))
    }

    /// Creates a new peer over the given connector and clock.
    pub fn new(
        url: &str,
        realm: &str,
        config: PeerConfig,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let realm = Uri::try_from(realm)?;
        let hello_details = config.hello_details()?;

        let (command_tx, command_rx) = unbounded_channel();
        let (outbound_tx, outbound_rx) = unbounded_channel();
        let (session_tx, session_rx) = unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::Disconnected);
        let (closed_tx, _) = broadcast::channel(16);
        let challenge_handler = SharedChallengeHandler::default();

        tokio::spawn(
            SessionManager {
                name: config.name.clone(),
                realm,
                hello_details,
                challenge_handler: challenge_handler.clone(),
                input_rx: session_rx,
                status_tx,
                closed_tx: closed_tx.clone(),
                outbound_tx: outbound_tx.clone(),
                command_tx: command_tx.clone(),
            }
            .run(),
        );
        let supervisor = tokio::spawn(
            Supervisor {
                name: config.name.clone(),
                url: url.to_owned(),
                connector,
                clock: clock.clone(),
                policy: ReconnectPolicy::new(config.reconnect.clone()),
                command_rx,
                outbound_rx,
                session_tx,
            }
            .run(),
        );

        Ok(Self {
            context: Arc::new(PeerContext {
                name: config.name,
                command_tx,
                outbound_tx,
                status_rx,
                clock,
                call_timeout: config.call_timeout,
                reconnect: config.reconnect,
            }),
            challenge_handler,
            closed_tx,
            supervisor: Mutex::new(Some(supervisor)),
            closed: AtomicBool::new(false),
        })
    }

    /// Installs the handler for authentication challenges in all later handshakes.
    pub async fn on_challenge<H>(&self, handler: H)
    where
        H: ChallengeHandler + 'static,
    {
        *self.challenge_handler.lock().await = Some(Arc::new(handler));
    }

    /// Opens the connection, keeping it open for as long as the lease lives.
    pub fn open(&self) -> ConnectionLease {
        self.context.lease()
    }

    /// Waits for an established session.
    ///
    /// Does not open the connection on its own.
    pub async fn session(&self) -> Result<Session> {
        wait_for_session(&mut self.context.status_rx(), None).await
    }

    /// The receiver of session status changes.
    pub fn status_rx(&self) -> watch::Receiver<SessionStatus> {
        self.context.status_rx()
    }

    /// The receiver of sessions closed by the router, with ABORT or GOODBYE.
    pub fn session_closed_rx(&self) -> broadcast::Receiver<SessionClosedError> {
        self.closed_tx.subscribe()
    }

    /// Calls a procedure.
    pub fn call(&self, procedure: Uri, call: RpcCall) -> PendingCall {
        PendingCall::new(self.context.clone(), procedure, call)
    }

    /// Calls a procedure and waits for its result.
    pub async fn call_and_wait(&self, procedure: Uri, call: RpcCall) -> Result<RpcResult> {
        self.call(procedure, call).result().await
    }

    /// Calls a procedure, receiving progressive results.
    pub fn progressive_call(&self, procedure: Uri, call: RpcCall) -> ProgressivePendingCall {
        ProgressivePendingCall::new(self.context.clone(), procedure, call)
    }

    /// Registers a procedure.
    pub fn register<P>(&self, procedure: Uri, handler: P, options: ProcedureOptions) -> Registration
    where
        P: Procedure + 'static,
    {
        Registration::new(
            self.context.clone(),
            procedure,
            registration_options(options, false),
            false,
            Arc::new(handler),
        )
    }

    /// Registers a procedure that yields progressive results.
    pub fn progressive_register<P>(
        &self,
        procedure: Uri,
        handler: P,
        options: ProcedureOptions,
    ) -> Registration
    where
        P: Procedure + 'static,
    {
        Registration::new(
            self.context.clone(),
            procedure,
            registration_options(options, true),
            true,
            Arc::new(handler),
        )
    }

    /// Subscribes to a topic.
    pub fn topic(&self, topic: Uri, options: SubscriptionOptions) -> Subscription {
        Subscription::new(self.context.clone(), topic, options.into())
    }

    /// Publishes a stream of events to a topic.
    pub fn publish<S>(&self, topic: Uri, events: S, options: PublishOptions) -> Publication
    where
        S: Stream<Item = PublishedEvent> + Send + 'static,
    {
        Publication::new(self.context.clone(), topic, events.boxed(), options)
    }

    /// Publishes a single event to a topic.
    pub fn publish_event(
        &self,
        topic: Uri,
        event: PublishedEvent,
        options: PublishOptions,
    ) -> Publication {
        self.publish(topic, futures_util::stream::iter([event]), options)
    }

    /// Closes the peer, leaving the realm if a session is established.
    ///
    /// Calling this more than once is a no-op.
    pub async fn close(&self) -> Result<()> {
        if !self.shutdown() {
            return Ok(());
        }
        if let Some(supervisor) = self.supervisor.lock().await.take() {
            supervisor.await?;
        }
        Ok(())
    }

    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let farewell = match &*self.context.status_rx.borrow() {
            SessionStatus::Established(_) => {
                Some(goodbye_with_close_reason(CloseReason::Normal))
            }
            _ => None,
        };
        info!("Closing peer {}", self.context.name);
        self.context
            .command_tx
            .send(SupervisorCommand::Shutdown { farewell })
            .ok();
        true
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
