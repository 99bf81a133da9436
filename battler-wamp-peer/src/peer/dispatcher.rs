use ahash::HashMap;
use log::debug;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    core::id::Id,
    message::{
        common::INVOCATION_TAG,
        message::Message,
    },
};

/// The correlation key a routed message is matched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RouteKey {
    /// Responses to a single request.
    Request(Id),
    /// INVOCATION and revocation for a confirmed registration.
    Registration(Id),
    /// EVENT and revocation for a confirmed subscription.
    Subscription(Id),
    /// INTERRUPT for an invocation still being handled.
    Invocation(Id),
}

/// The result of dispatching one inbound message.
#[derive(Debug)]
pub(crate) enum Dispatch {
    /// The message drives the session handshake or teardown.
    Session(Message),
    /// The message reached at least one operation.
    Delivered,
    /// No live route matched the message.
    Unrouted(Message),
}

const PRUNE_INTERVAL: usize = 64;

/// Demultiplexes inbound messages onto the operations waiting for them.
///
/// Owned by the connection supervisor. Routes are installed from outbound messages before they are
/// written, so a response can never arrive ahead of its route.
#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    routes: HashMap<RouteKey, Vec<UnboundedSender<Message>>>,
    installs_since_prune: usize,
}

impl Dispatcher {
    /// Installs a route for an operation.
    pub fn install(&mut self, key: RouteKey, tx: UnboundedSender<Message>) {
        self.installs_since_prune += 1;
        if self.installs_since_prune >= PRUNE_INTERVAL {
            self.prune();
        }
        self.routes.entry(key).or_default().push(tx);
    }

    /// Number of live route keys.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Drops every route, ending all operation receivers.
    pub fn reset(&mut self) {
        self.routes.clear();
        self.installs_since_prune = 0;
    }

    /// Updates routes for a message the peer is about to write.
    pub fn observe_outbound(&mut self, message: &Message) {
        match message {
            Message::Yield(message) if !message.progress() => {
                self.routes
                    .remove(&RouteKey::Invocation(message.invocation_request));
            }
            Message::Error(message) if message.request_type == INVOCATION_TAG => {
                self.routes.remove(&RouteKey::Invocation(message.request));
            }
            _ => (),
        }
    }

    /// Routes an inbound message.
    pub fn dispatch(&mut self, message: Message) -> Dispatch {
        match &message {
            Message::Welcome(_)
            | Message::Challenge(_)
            | Message::Abort(_)
            | Message::Goodbye(_) => Dispatch::Session(message),
            Message::Result(result) => {
                let key = RouteKey::Request(result.call_request);
                let terminal = !result.progress();
                self.deliver(key, message, terminal)
            }
            Message::Error(error) => {
                let key = RouteKey::Request(error.request);
                self.deliver(key, message, true)
            }
            Message::Published(published) => {
                let key = RouteKey::Request(published.publish_request);
                self.deliver(key, message, true)
            }
            Message::Registered(registered) => {
                let key = RouteKey::Registration(registered.registration);
                self.promote(RouteKey::Request(registered.register_request), key);
                self.deliver(key, message, false)
            }
            Message::Subscribed(subscribed) => {
                let key = RouteKey::Subscription(subscribed.subscription);
                self.promote(RouteKey::Request(subscribed.subscribe_request), key);
                self.deliver(key, message, false)
            }
            Message::Unregistered(unregistered) => match unregistered.revoked_registration() {
                Some(registration) => {
                    self.deliver(RouteKey::Registration(registration), message, true)
                }
                None => match message.request_id() {
                    Some(request) => self.deliver(RouteKey::Request(request), message, true),
                    None => Dispatch::Unrouted(message),
                },
            },
            Message::Unsubscribed(unsubscribed) => match unsubscribed.revoked_subscription() {
                Some(subscription) => {
                    self.deliver(RouteKey::Subscription(subscription), message, true)
                }
                None => match message.request_id() {
                    Some(request) => self.deliver(RouteKey::Request(request), message, true),
                    None => Dispatch::Unrouted(message),
                },
            },
            Message::Event(event) => {
                let key = RouteKey::Subscription(event.subscribed_subscription);
                self.deliver(key, message, false)
            }
            Message::Invocation(invocation) => {
                let key = RouteKey::Registration(invocation.registered_registration);
                if let Some(senders) = self.routes.get(&key) {
                    let senders = senders.clone();
                    self.routes
                        .insert(RouteKey::Invocation(invocation.request), senders);
                }
                self.deliver(key, message, false)
            }
            Message::Interrupt(interrupt) => {
                let key = RouteKey::Invocation(interrupt.invocation_request);
                self.deliver(key, message, true)
            }
            Message::Hello(_)
            | Message::Authenticate(_)
            | Message::Publish(_)
            | Message::Subscribe(_)
            | Message::Unsubscribe(_)
            | Message::Call(_)
            | Message::Cancel(_)
            | Message::Register(_)
            | Message::Unregister(_)
            | Message::Yield(_) => Dispatch::Unrouted(message),
        }
    }

    fn promote(&mut self, from: RouteKey, to: RouteKey) {
        if let Some(senders) = self.routes.remove(&from) {
            self.routes.entry(to).or_default().extend(senders);
        }
    }

    fn deliver(&mut self, key: RouteKey, message: Message, terminal: bool) -> Dispatch {
        let senders = match self.routes.get_mut(&key) {
            Some(senders) => senders,
            None => return Dispatch::Unrouted(message),
        };
        senders.retain(|tx| !tx.is_closed());
        let delivered = senders
            .iter()
            .filter(|tx| tx.send(message.clone()).is_ok())
            .count();
        if terminal || senders.is_empty() {
            self.routes.remove(&key);
        }
        if delivered == 0 {
            return Dispatch::Unrouted(message);
        }
        Dispatch::Delivered
    }

    fn prune(&mut self) {
        let before = self.routes.len();
        self.routes.retain(|_, senders| {
            senders.retain(|tx| !tx.is_closed());
            !senders.is_empty()
        });
        debug!(
            "Pruned {} closed route(s), {} remaining",
            before - self.routes.len(),
            self.routes.len()
        );
        self.installs_since_prune = 0;
    }
}

#[cfg(test)]
mod dispatcher_test {
    use battler_wamp_values::{
        Dictionary,
        List,
        Value,
    };
    use tokio::sync::mpsc::unbounded_channel;

    use crate::{
        core::id::Id,
        message::message::{
            EventMessage,
            InterruptMessage,
            InvocationMessage,
            Message,
            RegisteredMessage,
            ResultMessage,
            SubscribedMessage,
            UnregisteredMessage,
            WelcomeMessage,
            YieldMessage,
        },
        peer::dispatcher::{
            Dispatch,
            Dispatcher,
            RouteKey,
        },
    };

    fn id(value: u64) -> Id {
        Id::try_from(value).unwrap()
    }

    fn result(request: u64, progress: bool) -> Message {
        Message::Result(ResultMessage {
            call_request: id(request),
            details: if progress {
                Dictionary::from_iter([("progress".to_owned(), Value::Bool(true))])
            } else {
                Dictionary::default()
            },
            yield_arguments: List::from_iter([Value::Integer(1)]),
            yield_arguments_keyword: Dictionary::default(),
        })
    }

    fn event(subscription: u64) -> Message {
        Message::Event(EventMessage {
            subscribed_subscription: id(subscription),
            published_publication: id(1),
            ..Default::default()
        })
    }

    #[test]
    fn sends_session_messages_to_session_manager() {
        let mut dispatcher = Dispatcher::default();
        assert_matches::assert_matches!(
            dispatcher.dispatch(Message::Welcome(WelcomeMessage::default())),
            Dispatch::Session(Message::Welcome(_))
        );
    }

    #[test]
    fn routes_results_by_request_id_until_terminal() {
        let mut dispatcher = Dispatcher::default();
        let (tx, mut rx) = unbounded_channel();
        dispatcher.install(RouteKey::Request(id(1)), tx);

        assert_matches::assert_matches!(dispatcher.dispatch(result(2, false)), Dispatch::Unrouted(_));
        assert_matches::assert_matches!(dispatcher.dispatch(result(1, true)), Dispatch::Delivered);
        assert_matches::assert_matches!(dispatcher.dispatch(result(1, false)), Dispatch::Delivered);
        assert_matches::assert_matches!(dispatcher.dispatch(result(1, false)), Dispatch::Unrouted(_));

        assert_matches::assert_matches!(rx.try_recv(), Ok(Message::Result(message)) => {
            assert!(message.progress());
        });
        assert_matches::assert_matches!(rx.try_recv(), Ok(Message::Result(message)) => {
            assert!(!message.progress());
        });
        // The route was removed, so the sender is gone.
        assert_matches::assert_matches!(rx.try_recv(), Err(_));
        assert_eq!(dispatcher.len(), 0);
    }

    #[test]
    fn installs_subscription_route_on_subscribed() {
        let mut dispatcher = Dispatcher::default();
        let (tx, mut rx) = unbounded_channel();
        dispatcher.install(RouteKey::Request(id(7)), tx);

        // Events before the confirmation have nowhere to go.
        assert_matches::assert_matches!(dispatcher.dispatch(event(55)), Dispatch::Unrouted(_));
        assert_matches::assert_matches!(
            dispatcher.dispatch(Message::Subscribed(SubscribedMessage {
                subscribe_request: id(7),
                subscription: id(55),
            })),
            Dispatch::Delivered
        );
        assert_matches::assert_matches!(dispatcher.dispatch(event(55)), Dispatch::Delivered);
        assert_matches::assert_matches!(dispatcher.dispatch(event(56)), Dispatch::Unrouted(_));

        assert_matches::assert_matches!(rx.try_recv(), Ok(Message::Subscribed(_)));
        assert_matches::assert_matches!(rx.try_recv(), Ok(Message::Event(message)) => {
            assert_eq!(message.subscribed_subscription, id(55));
        });
        assert_matches::assert_matches!(rx.try_recv(), Err(_));
    }

    #[test]
    fn routes_interrupt_to_registration_owning_invocation() {
        let mut dispatcher = Dispatcher::default();
        let (tx, mut rx) = unbounded_channel();
        dispatcher.install(RouteKey::Request(id(3)), tx);
        dispatcher.dispatch(Message::Registered(RegisteredMessage {
            register_request: id(3),
            registration: id(54321),
        }));
        assert_matches::assert_matches!(
            dispatcher.dispatch(Message::Invocation(InvocationMessage {
                request: id(100),
                registered_registration: id(54321),
                ..Default::default()
            })),
            Dispatch::Delivered
        );
        assert_matches::assert_matches!(
            dispatcher.dispatch(Message::Interrupt(InterruptMessage {
                invocation_request: id(100),
                options: Dictionary::default(),
            })),
            Dispatch::Delivered
        );
        assert_matches::assert_matches!(
            dispatcher.dispatch(Message::Interrupt(InterruptMessage {
                invocation_request: id(100),
                options: Dictionary::default(),
            })),
            Dispatch::Unrouted(_)
        );

        assert_matches::assert_matches!(rx.try_recv(), Ok(Message::Registered(_)));
        assert_matches::assert_matches!(rx.try_recv(), Ok(Message::Invocation(_)));
        assert_matches::assert_matches!(rx.try_recv(), Ok(Message::Interrupt(_)));
    }

    #[test]
    fn final_yield_removes_invocation_route() {
        let mut dispatcher = Dispatcher::default();
        let (tx, _rx) = unbounded_channel();
        dispatcher.install(RouteKey::Registration(id(9)), tx);
        dispatcher.dispatch(Message::Invocation(InvocationMessage {
            request: id(10),
            registered_registration: id(9),
            ..Default::default()
        }));
        assert_eq!(dispatcher.len(), 2);

        dispatcher.observe_outbound(&Message::Yield(YieldMessage {
            invocation_request: id(10),
            options: Dictionary::from_iter([("progress".to_owned(), Value::Bool(true))]),
            ..Default::default()
        }));
        assert_eq!(dispatcher.len(), 2);

        dispatcher.observe_outbound(&Message::Yield(YieldMessage {
            invocation_request: id(10),
            ..Default::default()
        }));
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn routes_revocation_to_registration() {
        let mut dispatcher = Dispatcher::default();
        let (tx, mut rx) = unbounded_channel();
        dispatcher.install(RouteKey::Registration(id(54321)), tx);
        assert_matches::assert_matches!(
            dispatcher.dispatch(Message::Unregistered(UnregisteredMessage {
                unregister_request: 0,
                details: Dictionary::from_iter([(
                    "registration".to_owned(),
                    Value::Integer(54321),
                )]),
            })),
            Dispatch::Delivered
        );
        assert_matches::assert_matches!(rx.try_recv(), Ok(Message::Unregistered(_)));
        assert_eq!(dispatcher.len(), 0);
    }

    #[test]
    fn skips_closed_routes() {
        let mut dispatcher = Dispatcher::default();
        let (tx, rx) = unbounded_channel();
        dispatcher.install(RouteKey::Subscription(id(1)), tx);
        drop(rx);
        assert_matches::assert_matches!(dispatcher.dispatch(event(1)), Dispatch::Unrouted(_));
        assert_eq!(dispatcher.len(), 0);
    }

    #[test]
    fn fans_out_shared_subscription() {
        let mut dispatcher = Dispatcher::default();
        let (a_tx, mut a_rx) = unbounded_channel();
        let (b_tx, mut b_rx) = unbounded_channel();
        dispatcher.install(RouteKey::Subscription(id(4)), a_tx);
        dispatcher.install(RouteKey::Subscription(id(4)), b_tx);
        assert_matches::assert_matches!(dispatcher.dispatch(event(4)), Dispatch::Delivered);
        assert_matches::assert_matches!(a_rx.try_recv(), Ok(Message::Event(_)));
        assert_matches::assert_matches!(b_rx.try_recv(), Ok(Message::Event(_)));
    }

    #[test]
    fn reset_ends_all_routes() {
        let mut dispatcher = Dispatcher::default();
        let (tx, mut rx) = unbounded_channel();
        dispatcher.install(RouteKey::Request(id(1)), tx);
        dispatcher.reset();
        assert_matches::assert_matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        );
    }
}
