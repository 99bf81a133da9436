//! A reconnecting WAMP peer.
//!
//! A [`Peer`][`peer::Peer`] multiplexes procedure calls, registrations, subscriptions, and
//! publications over a single supervised router connection. Operations wait for a WAMP session,
//! survive transport loss where they can, and tear down their router-side state when dropped.

pub mod auth;
pub mod core;
pub mod message;
pub mod peer;
pub mod serializer;
pub mod transport;
