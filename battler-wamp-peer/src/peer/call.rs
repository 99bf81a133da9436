use std::{
    sync::Arc,
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use battler_wamp_values::{
    Dictionary,
    List,
    Value,
};
use futures_util::{
    Stream,
    StreamExt,
};
use log::debug;
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
        backoff::ReconnectPolicy,
        error::{
            CallTimeoutError,
            PeerNotConnectedError,
            WampError,
        },
        id::next_request_id,
        uri::Uri,
    },
    message::{
        common::cancel,
        message::{
            CallMessage,
            Message,
            ResultMessage,
        },
    },
    peer::{
        context::PeerContext,
        dispatcher::RouteKey,
        session::{
            session_lost,
            wait_for_session,
        },
    },
};

/// A procedure call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RpcCall {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    /// Options merged into the CALL message.
    pub options: Dictionary,
    /// Overrides the peer's default call timeout.
    pub timeout: Option<Duration>,
}

/// A result of a procedure call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RpcResult {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
    /// Details of the RESULT message, without the `progress` flag.
    pub details: Dictionary,
    /// More results follow this one.
    pub progress: bool,
}

/// Interprets a RESULT message for a call that has `emitted` results before.
///
/// Returns the result to hand out, if any, and whether the call is finished.
fn interpret_result(message: ResultMessage, emitted: bool) -> (Option<RpcResult>, bool) {
    let progress = message.progress();
    let mut details = message.details;
    details.remove("progress");
    let result = RpcResult {
        arguments: message.yield_arguments,
        arguments_keyword: message.yield_arguments_keyword,
        details,
        progress,
    };
    if progress {
        return (Some(result), false);
    }
    // A final RESULT after progressive results only terminates the call, unless it carries a
    // payload of its own.
    if !emitted || !result.arguments.is_empty() || !result.arguments_keyword.is_empty() {
        (Some(result), true)
    } else {
        (None, true)
    }
}

enum Outcome {
    Done,
    Lost,
}

struct CallTask {
    context: Arc<PeerContext>,
    procedure: Uri,
    call: RpcCall,
    progressive: bool,
    result_tx: UnboundedSender<Result<RpcResult>>,
    stop_rx: oneshot::Receiver<()>,
}

impl CallTask {
    async fn run(mut self) {
        let _lease = self.context.lease();
        let timeout = self.call.timeout.unwrap_or(self.context.call_timeout);
        let started = self.context.clock.now();
        let mut deadline = self.context.clock.sleep(timeout);
        let mut status_rx = self.context.status_rx();
        let mut reissue = ReconnectPolicy::new(self.context.reconnect.clone());
        let mut emitted = false;
        let mut after = None;
        loop {
            let session = tokio::select! {
                session = wait_for_session(&mut status_rx, after) => session,
                _ = &mut deadline => {
                    self.fail(CallTimeoutError { procedure: self.procedure.clone() }.into());
                    return;
                }
                _ = &mut self.stop_rx => return,
            };
            let session = match session {
                Ok(session) => session,
                Err(err) => {
                    self.fail(err);
                    return;
                }
            };

            let request = next_request_id();
            let message = Message::Call(CallMessage {
                request,
                options: self.options(),
                procedure: self.procedure.clone(),
                arguments: self.call.arguments.clone(),
                arguments_keyword: self.call.arguments_keyword.clone(),
            });
            let mut message_rx = match self.context.send_routed(
                &session,
                message,
                RouteKey::Request(request),
            ) {
                Ok(message_rx) => message_rx,
                Err(err) => {
                    self.fail(err);
                    return;
                }
            };
            debug!(
                "Peer {} calling {} with request {request}",
                self.context.name, self.procedure
            );

            let outcome = loop {
                tokio::select! {
                    biased;
                    message = message_rx.recv() => match message {
                        Some(Message::Result(message)) => {
                            let (result, done) = interpret_result(message, emitted);
                            if let Some(result) = result {
                                emitted = true;
                                self.result_tx.send(Ok(result)).ok();
                            }
                            if done {
                                break Outcome::Done;
                            }
                            reissue.reset();
                        }
                        Some(Message::Error(message)) => {
                            self.fail(WampError::from_message(message, self.procedure.clone()).into());
                            break Outcome::Done;
                        }
                        Some(message) => {
                            debug!(
                                "Peer {} ignored {} message for call {request}",
                                self.context.name,
                                message.message_name()
                            );
                        }
                        None => break Outcome::Lost,
                    },
                    _ = &mut deadline => {
                        self.context.send(session.generation, cancel(request)).ok();
                        self.fail(CallTimeoutError { procedure: self.procedure.clone() }.into());
                        break Outcome::Done;
                    }
                    _ = &mut self.stop_rx => {
                        debug!("Peer {} canceling call {request}", self.context.name);
                        self.context.send(session.generation, cancel(request)).ok();
                        break Outcome::Done;
                    }
                }
            };
            if let Outcome::Done = outcome {
                debug!(
                    "Peer {} finished call to {} after {}ms",
                    self.context.name,
                    self.procedure,
                    (self.context.clock.now() - started).as_millis()
                );
                return;
            }

            if let Err(err) = session_lost(&mut status_rx, session.generation).await {
                self.fail(err);
                return;
            }
            if !self.progressive {
                self.fail(PeerNotConnectedError.into());
                return;
            }
            let delay = match reissue.next_delay() {
                Some(delay) => delay,
                None => {
                    self.fail(PeerNotConnectedError.into());
                    return;
                }
            };
            debug!(
                "Peer {} reissuing progressive call to {} in {}ms",
                self.context.name,
                self.procedure,
                delay.as_millis()
            );
            tokio::select! {
                _ = self.context.clock.sleep(delay) => (),
                _ = &mut deadline => {
                    self.fail(CallTimeoutError { procedure: self.procedure.clone() }.into());
                    return;
                }
                _ = &mut self.stop_rx => return,
            }
            after = Some(session.generation);
        }
    }

    fn options(&self) -> Dictionary {
        let mut options = self.call.options.clone();
        if self.progressive {
            options.insert("receive_progress".to_owned(), Value::Bool(true));
        }
        options
    }

    fn fail(&self, err: Error) {
        self.result_tx.send(Err(err)).ok();
    }
}

struct PendingRpc {
    result_rx: UnboundedReceiver<Result<RpcResult>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl PendingRpc {
    fn start(context: Arc<PeerContext>, procedure: Uri, call: RpcCall, progressive: bool) -> Self {
        let (result_tx, result_rx) = unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(
            CallTask {
                context,
                procedure,
                call,
                progressive,
                result_tx,
                stop_rx,
            }
            .run(),
        );
        Self {
            result_rx,
            stop_tx: Some(stop_tx),
        }
    }

    fn cancel(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            stop_tx.send(()).ok();
        }
    }
}

/// A pending procedure call, which is expected to produce one result.
///
/// Dropping the call before it resolves cancels it.
pub struct PendingCall {
    pending: PendingRpc,
}

impl PendingCall {
    pub(crate) fn new(context: Arc<PeerContext>, procedure: Uri, call: RpcCall) -> Self {
        Self {
            pending: PendingRpc::start(context, procedure, call, false),
        }
    }

    /// Waits for the result of the procedure call.
    pub async fn result(mut self) -> Result<RpcResult> {
        match self.pending.result_rx.recv().await {
            Some(result) => result,
            None => Err(Error::msg("procedure call finished with no result")),
        }
    }

    /// Cancels the call, sending CANCEL if it has not resolved.
    pub fn cancel(mut self) {
        self.pending.cancel();
    }
}

/// A progressive pending procedure call, which is expected to produce one or more results.
///
/// Survives connection loss by calling the procedure again on the next session.
pub struct ProgressivePendingCall {
    pending: PendingRpc,
    done: bool,
}

impl ProgressivePendingCall {
    pub(crate) fn new(context: Arc<PeerContext>, procedure: Uri, call: RpcCall) -> Self {
        Self {
            pending: PendingRpc::start(context, procedure, call, true),
            done: false,
        }
    }

    /// Whether the call has produced all of its results.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Waits for the next result of the procedure call.
    ///
    /// Returns [`None`] once the call is finished or canceled.
    pub async fn next_result(&mut self) -> Result<Option<RpcResult>> {
        if self.done {
            return Ok(None);
        }
        match self.pending.result_rx.recv().await {
            Some(Ok(result)) => {
                self.done = !result.progress;
                Ok(Some(result))
            }
            Some(Err(err)) => {
                self.done = true;
                Err(err)
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Cancels the call.
    pub fn cancel(&mut self) {
        self.pending.cancel();
    }

    /// Wraps the call as a stream of results.
    ///
    /// The stream is finished on the last result or error.
    pub fn into_stream(self) -> impl Stream<Item = Result<RpcResult>> {
        futures_util::stream::unfold(self, |mut call| async move {
            match call.next_result().await {
                Ok(Some(result)) => Some((Ok(result), call)),
                Ok(None) => None,
                Err(err) => Some((Err(err), call)),
            }
        })
        .boxed()
    }
}
