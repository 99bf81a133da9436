use std::{
    fmt::Debug,
    time::Duration,
};

use futures_util::{
    FutureExt,
    future::BoxFuture,
};
use tokio::time::Instant;

/// A source of time for timeouts and reconnect delays.
pub trait Clock: Send + Sync + Debug {
    /// The current instant.
    fn now(&self) -> Instant;

    /// Completes after the given duration has elapsed.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// A [`Clock`] backed by the tokio timer.
///
/// Cooperates with `tokio::time::pause`, so tests can advance virtual time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}
