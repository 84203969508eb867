use std::{pin::Pin, sync::Arc};

use futures::{
    stream::{self, SelectAll},
    Stream, StreamExt,
};
use serde_json::Value;

use crate::{context::Context, router::Router};

use super::{
    execute::ExecutorResult,
    subscription_map::SubscriptionMap,
    types::{Request, Response, ResponseInner, ResultFrame, ServerNotice},
};

/// Builds the fresh, per-call [`Context`] a transport wants its handlers to
/// see (authenticated session, connection info, injected collaborators...).
pub type ContextFactory = Arc<dyn Fn() -> Context + Send + Sync>;

type TaskStream = Pin<Box<dyn Stream<Item = Response> + Send>>;

/// One logical connection able to carry subscriptions.
///
/// For a WebSocket transport this wraps one socket; for an in-process caller,
/// one client handle. The transport feeds inbound frames to
/// [`Connection::handle`] and drains [`Connection::next_response`] for
/// everything that resolves asynchronously (read/write results and
/// subscription frames). The connection must be driven from one place: a
/// transport that batches inbound frames still presents them here serially.
pub struct Connection {
    router: Arc<Router>,
    ctx_factory: ContextFactory,
    subscriptions: SubscriptionMap,
    tasks: SelectAll<TaskStream>,
}

impl Connection {
    pub fn new(router: Arc<Router>, ctx_factory: impl Fn() -> Context + Send + Sync + 'static) -> Self {
        Self {
            router,
            ctx_factory: Arc::new(ctx_factory),
            subscriptions: SubscriptionMap::default(),
            tasks: SelectAll::new(),
        }
    }

    /// Executes a batch of requests. Each request succeeds or fails
    /// independently; one bad call never poisons its batch.
    ///
    /// Responses that are ready without running a handler are returned
    /// directly. Everything else (handler futures, subscription sessions) is
    /// queued and surfaces through [`Connection::next_response`].
    pub fn handle(&mut self, requests: Vec<Request>) -> Vec<Response> {
        let mut responses = Vec::with_capacity(requests.len());

        for request in requests {
            let factory = self.ctx_factory.clone();
            let Some(result) =
                self.router
                    .dispatch(move || factory(), request, Some(&mut self.subscriptions))
            else {
                continue;
            };

            match result {
                ExecutorResult::Response(response) => responses.push(response),
                ExecutorResult::Future(fut) => {
                    self.tasks.push(Box::pin(stream::once(fut)));
                }
                ExecutorResult::Task(task) => {
                    self.tasks.push(Box::pin(task));
                }
            }
        }

        responses
    }

    /// Like [`Connection::handle`] but parses one physical frame first; the
    /// frame may hold a single request object or an array batch.
    ///
    /// A frame that fails to parse produces no responses: without an `id`
    /// there is nothing to correlate an error to.
    pub fn handle_raw(&mut self, raw: Value) -> Vec<Response> {
        match Request::parse_batch(raw) {
            Ok(requests) => self.handle(requests),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("error parsing inbound frame: {_err}");

                Vec::new()
            }
        }
    }

    /// The next asynchronously produced response frame, or `None` if nothing
    /// is currently in flight. Polling this is what drives handler futures
    /// and subscription sessions (pull-based backpressure: a session does not
    /// produce its next event until the previous frame was taken).
    pub async fn next_response(&mut self) -> Option<Response> {
        let response = self.tasks.next().await?;

        // A `stopped` frame is always a session's last; deregister it.
        if matches!(
            response.inner,
            ResponseInner::Result(ResultFrame::Stopped)
        ) {
            self.subscriptions.remove(&response.id);
        }

        Some(response)
    }

    /// Stops every active session and hands back the notice to send so that
    /// clients re-establish their subscriptions with their last-seen event
    /// ids. Each stopping session still emits its own `stopped` frame.
    pub fn reset_subscriptions(&mut self) -> ServerNotice {
        self.subscriptions.shutdown_all();
        ServerNotice::Reconnect
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }
}
