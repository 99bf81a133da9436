use std::sync::Arc;

use anyhow::Result;
use battler_wamp_values::{
    Dictionary,
    List,
    Value,
};
use futures_util::{
    FutureExt,
    StreamExt,
    future::BoxFuture,
    stream::BoxStream,
};
use log::debug;
use tokio::{
    sync::{
        oneshot,
        watch,
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
        uri::Uri,
    },
    message::message::{
        Message,
        PublishMessage,
    },
    peer::{
        context::PeerContext,
        dispatcher::RouteKey,
        session::{
            Session,
            SessionStatus,
            session_lost,
            wait_for_session,
        },
    },
};

/// Options for publishing to a topic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    /// Wait for the router to acknowledge every event.
    pub acknowledge: bool,
    /// Whether the publisher should receive its own events, if subscribed.
    pub exclude_me: Option<bool>,
    /// Sessions that should not receive the events.
    pub exclude: Vec<Id>,
    /// Sessions that may receive the events.
    pub eligible: Vec<Id>,
    pub exclude_authid: Vec<String>,
    pub eligible_authid: Vec<String>,
    /// The publisher's identity should be disclosed.
    pub disclose_me: bool,
    /// Additional options sent as-is.
    pub extra: Dictionary,
}

fn id_list(ids: Vec<Id>) -> Value {
    Value::List(ids.into_iter().map(|id| Value::Integer(id.value())).collect())
}

fn string_list(strings: Vec<String>) -> Value {
    Value::List(strings.into_iter().map(Value::String).collect())
}

impl From<PublishOptions> for Dictionary {
    fn from(value: PublishOptions) -> Self {
        let mut options = value.extra;
        if value.acknowledge {
            options.insert("acknowledge".to_owned(), Value::Bool(true));
        }
        if let Some(exclude_me) = value.exclude_me {
            options.insert("exclude_me".to_owned(), Value::Bool(exclude_me));
        }
        if !value.exclude.is_empty() {
            options.insert("exclude".to_owned(), id_list(value.exclude));
        }
        if !value.eligible.is_empty() {
            options.insert("eligible".to_owned(), id_list(value.eligible));
        }
        if !value.exclude_authid.is_empty() {
            options.insert(
                "exclude_authid".to_owned(),
                string_list(value.exclude_authid),
            );
        }
        if !value.eligible_authid.is_empty() {
            options.insert(
                "eligible_authid".to_owned(),
                string_list(value.eligible_authid),
            );
        }
        if value.disclose_me {
            options.insert("disclose_me".to_owned(), Value::Bool(true));
        }
        options
    }
}

/// An event to publish.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// Completes when the session on `generation` is no longer established.
async fn session_ended(status_rx: &mut watch::Receiver<SessionStatus>, generation: u64) {
    loop {
        match &*status_rx.borrow_and_update() {
            SessionStatus::Established(session) if session.generation == generation => (),
            _ => return,
        }
        if status_rx.changed().await.is_err() {
            return;
        }
    }
}

enum Outcome {
    Done,
    Lost,
}

struct PublicationTask {
    context: Arc<PeerContext>,
    topic: Uri,
    options: Dictionary,
    acknowledge: bool,
    events: BoxStream<'static, PublishedEvent>,
    /// Resolves once the publication is cancelled. Detaching never resolves it.
    stopped: BoxFuture<'static, ()>,
    /// An event pulled from the source but not yet published.
    pending: Option<PublishedEvent>,
}

impl PublicationTask {
    async fn run(mut self) -> Result<()> {
        let _lease = self.context.lease();
        let mut status_rx = self.context.status_rx();
        let mut after = None;
        loop {
            let session = tokio::select! {
                biased;
                _ = &mut self.stopped => return Ok(()),
                session = wait_for_session(&mut status_rx, after) => session?,
            };
            if let Outcome::Done = self.forward(&session, &mut status_rx).await? {
                return Ok(());
            }
            session_lost(&mut status_rx, session.generation).await?;
            debug!(
                "Peer {} resuming publication to {} on the next session",
                self.context.name, self.topic
            );
            after = Some(session.generation);
        }
    }

    async fn forward(
        &mut self,
        session: &Session,
        status_rx: &mut watch::Receiver<SessionStatus>,
    ) -> Result<Outcome> {
        loop {
            let event = match self.pending.take() {
                Some(event) => event,
                None => tokio::select! {
                    biased;
                    _ = &mut self.stopped => return Ok(Outcome::Done),
                    _ = session_ended(status_rx, session.generation) => return Ok(Outcome::Lost),
                    event = self.events.next() => match event {
                        Some(event) => event,
                        None => return Ok(Outcome::Done),
                    },
                },
            };

            let request = next_request_id();
            let message = Message::Publish(PublishMessage {
                request,
                options: self.options.clone(),
                topic: self.topic.clone(),
                arguments: event.arguments.clone(),
                arguments_keyword: event.arguments_keyword.clone(),
            });

            if !self.acknowledge {
                let established = matches!(
                    &*status_rx.borrow(),
                    SessionStatus::Established(current) if current.generation == session.generation
                );
                if !established {
                    self.pending = Some(event);
                    return Ok(Outcome::Lost);
                }
                self.context.send(session.generation, message)?;
                continue;
            }

            let mut message_rx =
                self.context
                    .send_routed(session, message, RouteKey::Request(request))?;
            loop {
                tokio::select! {
                    biased;
                    message = message_rx.recv() => match message {
                        Some(Message::Published(message)) => {
                            debug!(
                                "Peer {} published {} to {}",
                                self.context.name, message.publication, self.topic
                            );
                            break;
                        }
                        Some(Message::Error(message)) => {
                            return Err(WampError::from_message(message, self.topic.clone()).into());
                        }
                        Some(_) => (),
                        None => {
                            // Unacknowledged events are published again.
                            self.pending = Some(event);
                            return Ok(Outcome::Lost);
                        }
                    },
                    _ = &mut self.stopped => return Ok(Outcome::Done),
                }
            }
        }
    }
}

/// A publication of a stream of events to a topic.
///
/// Dropping the publication detaches it, so it keeps publishing until its source ends.
#[derive(Debug)]
pub struct Publication {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<Result<()>>,
}

impl Publication {
    pub(crate) fn new(
        context: Arc<PeerContext>,
        topic: Uri,
        events: BoxStream<'static, PublishedEvent>,
        options: PublishOptions,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let stopped = async move {
            if stop_rx.await.is_err() {
                futures_util::future::pending::<()>().await;
            }
        }
        .boxed();
        let acknowledge = options.acknowledge;
        let join_handle = tokio::spawn(
            PublicationTask {
                context,
                topic,
                options: options.into(),
                acknowledge,
                events,
                stopped,
                pending: None,
            }
            .run(),
        );
        Self {
            stop_tx: Some(stop_tx),
            join_handle,
        }
    }

    /// Stops publishing events.
    pub fn cancel(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            stop_tx.send(()).ok();
        }
    }

    /// Waits for the publication to finish.
    pub async fn join(self) -> Result<()> {
        self.join_handle.await?
    }
}

#[cfg(test)]
mod publication_test {
    use battler_wamp_values::{
        Dictionary,
        List,
        Value,
    };

    use crate::{
        core::id::Id,
        peer::publication::PublishOptions,
    };

    #[test]
    fn default_options_are_empty() {
        assert_eq!(
            Dictionary::from(PublishOptions::default()),
            Dictionary::default()
        );
    }

    #[test]
    fn writes_black_and_white_lists() {
        let options = Dictionary::from(PublishOptions {
            acknowledge: true,
            exclude_me: Some(false),
            exclude: vec![Id::try_from(5).unwrap()],
            eligible_authid: vec!["alice".to_owned()],
            ..Default::default()
        });
        pretty_assertions::assert_eq!(
            options,
            Dictionary::from_iter([
                ("acknowledge".to_owned(), Value::Bool(true)),
                ("exclude_me".to_owned(), Value::Bool(false)),
                (
                    "exclude".to_owned(),
                    Value::List(List::from_iter([Value::Integer(5)]))
                ),
                (
                    "eligible_authid".to_owned(),
                    Value::List(List::from_iter([Value::String("alice".to_owned())]))
                ),
            ])
        );
    }
}
