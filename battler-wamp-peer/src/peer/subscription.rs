use std::{
    pin::Pin,
    sync::Arc,
    task,
};

use anyhow::Result;
use battler_wamp_values::{
    Dictionary,
    List,
    Value,
};
use futures_util::Stream;
use log::{
    debug,
    info,
};
use tokio::sync::{
    mpsc::{
        UnboundedReceiver,
        UnboundedSender,
        unbounded_channel,
    },
    oneshot,
};

use crate::{
    core::{
        error::WampError,
        id::{
            Id,
            next_request_id,
        },
        match_style::MatchStyle,
        uri::Uri,
    },
    message::message::{
        EventMessage,
        Message,
        SubscribeMessage,
        UnsubscribeMessage,
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

/// Options for subscribing to a topic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// How the subscription should be matched for published events.
    pub match_style: Option<MatchStyle>,
    /// Additional options sent as-is.
    pub extra: Dictionary,
}

impl From<SubscriptionOptions> for Dictionary {
    fn from(value: SubscriptionOptions) -> Self {
        let mut options = value.extra;
        if let Some(match_style) = value.match_style {
            options.insert("match".to_owned(), Value::String(match_style.into()));
        }
        options
    }
}

/// An event received for a subscription.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    pub details: Dictionary,
    /// The publication ID assigned by the router.
    pub publication: Id,
    /// The topic the event was published to, for pattern-based subscriptions.
    pub topic: Option<Uri>,
}

impl ReceivedEvent {
    /// The publisher's session ID, if disclosed.
    pub fn publisher(&self) -> Option<Id> {
        self.details
            .get("publisher")
            .and_then(Value::integer)
            .and_then(|publisher| Id::try_from(publisher).ok())
    }
}

impl From<EventMessage> for ReceivedEvent {
    fn from(value: EventMessage) -> Self {
        let topic = value
            .details
            .get("topic")
            .and_then(Value::string)
            .and_then(|topic| Uri::try_from(topic).ok());
        Self {
            arguments: value.publish_arguments,
            arguments_keyword: value.publish_arguments_keyword,
            details: value.details,
            publication: value.published_publication,
            topic,
        }
    }
}

enum Outcome {
    Done,
    Lost,
}

struct SubscriptionTask {
    context: Arc<PeerContext>,
    topic: Uri,
    options: Dictionary,
    event_tx: UnboundedSender<Result<ReceivedEvent>>,
    stop_rx: oneshot::Receiver<()>,
}

impl SubscriptionTask {
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
            if let Outcome::Done = self.subscribe(&session).await {
                return;
            }
            if let Err(err) = session_lost(&mut status_rx, session.generation).await {
                self.event_tx.send(Err(err)).ok();
                return;
            }
            after = Some(session.generation);
        }
    }

    async fn subscribe(&mut self, session: &Session) -> Outcome {
        let request = next_request_id();
        let message = Message::Subscribe(SubscribeMessage {
            request,
            options: self.options.clone(),
            topic: self.topic.clone(),
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

        let mut subscription = None;
        loop {
            tokio::select! {
                biased;
                message = message_rx.recv() => match message {
                    Some(Message::Subscribed(message)) => {
                        info!(
                            "Peer {} subscribed to {} as {}",
                            self.context.name, self.topic, message.subscription
                        );
                        subscription = Some(message.subscription);
                    }
                    Some(Message::Error(message)) => {
                        self.event_tx
                            .send(Err(WampError::from_message(message, self.topic.clone()).into()))
                            .ok();
                        return Outcome::Done;
                    }
                    Some(Message::Event(message)) => {
                        self.event_tx.send(Ok(ReceivedEvent::from(message))).ok();
                    }
                    Some(Message::Unsubscribed(message)) => {
                        if message.revoked_subscription().is_some() {
                            info!("Subscription to {} was revoked by the router", self.topic);
                            return Outcome::Done;
                        }
                    }
                    Some(message) => {
                        debug!(
                            "Peer {} ignored {} message for subscription to {}",
                            self.context.name,
                            message.message_name(),
                            self.topic
                        );
                    }
                    None => return Outcome::Lost,
                },
                _ = &mut self.stop_rx => {
                    self.unsubscribe(session, subscription, message_rx).await;
                    return Outcome::Done;
                }
            }
        }
    }

    async fn unsubscribe(
        &self,
        session: &Session,
        subscription: Option<Id>,
        mut message_rx: UnboundedReceiver<Message>,
    ) {
        let subscription = match subscription {
            Some(subscription) => Some(subscription),
            None => {
                let confirmation = async {
                    while let Some(message) = message_rx.recv().await {
                        match message {
                            Message::Subscribed(message) => return Some(message.subscription),
                            Message::Error(_) => return None,
                            _ => (),
                        }
                    }
                    None
                };
                tokio::select! {
                    subscription = confirmation => subscription,
                    _ = self.context.clock.sleep(self.context.call_timeout) => None,
                }
            }
        };
        if let Some(subscription) = subscription {
            info!(
                "Peer {} unsubscribing from {} ({subscription})",
                self.context.name, self.topic
            );
            self.context
                .send(
                    session.generation,
                    Message::Unsubscribe(UnsubscribeMessage {
                        request: next_request_id(),
                        subscribed_subscription: subscription,
                    }),
                )
                .ok();
        }
    }
}

/// A subscription to a topic.
///
/// A stream of events, ending when the router revokes the subscription or rejects it. Dropping
/// the subscription unsubscribes from the topic.
pub struct Subscription {
    event_rx: UnboundedReceiver<Result<ReceivedEvent>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub(crate) fn new(context: Arc<PeerContext>, topic: Uri, options: Dictionary) -> Self {
        let (event_tx, event_rx) = unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(
            SubscriptionTask {
                context,
                topic,
                options,
                event_tx,
                stop_rx,
            }
            .run(),
        );
        Self {
            event_rx,
            stop_tx: Some(stop_tx),
        }
    }

    /// Unsubscribes from the topic.
    pub fn cancel(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            stop_tx.send(()).ok();
        }
    }
}

impl Stream for Subscription {
    type Item = Result<ReceivedEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        self.event_rx.poll_recv(cx)
    }
}
