use std::{
    borrow::Cow,
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{ready, stream::FusedStream, FutureExt, Stream};

use crate::{
    error::ExecError,
    middleware::{BoxFuture, ChainFut, ProcedureOutput},
    procedure::Validator,
    stream::{EventStream, StopToken},
};

use super::types::{RequestId, Response};

/// Where a session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Active,
    Draining,
    Stopped,
    Errored,
}

enum State {
    /// The middleware chain has not yet resolved to the handler's stream.
    /// If the request carried a resume cursor, the handler is replaying
    /// from it in here.
    Starting(ChainFut),
    Active(EventStream),
    /// Terminal error frame emitted; the `stopped` frame is pending.
    Errored,
    /// Stop observed (or the stream finished); the handler stream is already
    /// dropped and the `stopped` frame is pending.
    Draining,
    Stopped,
}

/// The stateful execution of one streaming procedure for one connection.
///
/// A `Stream` of wire frames: `started`, then a `data` frame per
/// [`TrackedEvent`](crate::TrackedEvent), then exactly one `stopped` frame.
/// If the handler failed, a single error frame precedes the `stopped`.
/// Driven pull-based: the handler is not polled for the next event until the
/// transport has accepted the previous frame, which bounds buffering.
///
/// Cancellation (via [`SubscriptionMap::shutdown`](super::SubscriptionMap))
/// is observed on the next poll even mid-production; the handler stream is
/// dropped at that point, releasing whatever it holds.
pub struct SubscriptionTask {
    id: RequestId,
    path: Cow<'static, str>,
    state: State,
    stop_fut: BoxFuture<()>,
    output: Option<Validator>,
    expose_errors: bool,
}

impl SubscriptionTask {
    pub(crate) fn new(
        id: RequestId,
        path: Cow<'static, str>,
        chain: ChainFut,
        output: Option<Validator>,
        stop: StopToken,
        expose_errors: bool,
    ) -> Self {
        Self {
            id,
            path,
            state: State::Starting(chain),
            stop_fut: Box::pin(async move { stop.stopped().await }),
            output,
            expose_errors,
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            State::Starting(_) => SessionState::Starting,
            State::Active(_) => SessionState::Active,
            State::Errored => SessionState::Errored,
            State::Draining => SessionState::Draining,
            State::Stopped => SessionState::Stopped,
        }
    }
}

impl fmt::Debug for SubscriptionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionTask")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

impl Stream for SubscriptionTask {
    type Item = Response;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            // Cancellation wins over further production. Dropping the state
            // here drops the handler stream, which is what releases the
            // handler's resources even mid-event.
            if matches!(this.state, State::Starting(_) | State::Active(_))
                && this.stop_fut.poll_unpin(cx).is_ready()
            {
                this.state = State::Draining;
            }

            match &mut this.state {
                State::Stopped => return Poll::Ready(None),

                State::Errored | State::Draining => {
                    this.state = State::Stopped;
                    // The terminal `None` still has to be observed.
                    cx.waker().wake_by_ref();
                    return Poll::Ready(Some(Response::stopped(this.id.clone())));
                }

                State::Starting(chain) => match ready!(chain.poll_unpin(cx)) {
                    Ok(ProcedureOutput::Events(events)) => {
                        this.state = State::Active(events);
                        cx.waker().wake_by_ref();
                        return Poll::Ready(Some(Response::started(this.id.clone())));
                    }
                    Ok(ProcedureOutput::Value(_)) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!(
                            path = %this.path,
                            "stream procedure resolved to a single value"
                        );

                        this.state = State::Errored;
                        cx.waker().wake_by_ref();
                        return Poll::Ready(Some(Response::error(
                            this.id.clone(),
                            ExecError::ContractViolation(
                                "stream procedure resolved to a single value",
                            )
                            .into(),
                            Some(this.path.clone()),
                            this.expose_errors,
                        )));
                    }
                    Err(err) => {
                        this.state = State::Errored;
                        cx.waker().wake_by_ref();
                        return Poll::Ready(Some(Response::error(
                            this.id.clone(),
                            err,
                            Some(this.path.clone()),
                            this.expose_errors,
                        )));
                    }
                },

                State::Active(events) => match ready!(events.as_mut().poll_next(cx)) {
                    Some(Ok(mut event)) => {
                        if let Some(validator) = &this.output {
                            match validator.check(event.payload) {
                                Ok(payload) => event.payload = payload,
                                Err(issues) => {
                                    this.state = State::Errored;
                                    cx.waker().wake_by_ref();
                                    return Poll::Ready(Some(Response::error(
                                        this.id.clone(),
                                        ExecError::OutputValidation(issues).into(),
                                        Some(this.path.clone()),
                                        this.expose_errors,
                                    )));
                                }
                            }
                        }

                        return Poll::Ready(Some(Response::event(this.id.clone(), event)));
                    }
                    Some(Err(err)) => {
                        this.state = State::Errored;
                        cx.waker().wake_by_ref();
                        return Poll::Ready(Some(Response::error(
                            this.id.clone(),
                            err,
                            Some(this.path.clone()),
                            this.expose_errors,
                        )));
                    }
                    // Natural completion: fall through to emit the `stopped`
                    // frame on this same poll.
                    None => this.state = State::Draining,
                },
            }
        }
    }
}

impl FusedStream for SubscriptionTask {
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Stopped)
    }
}
