use std::borrow::Cow;

use serde_json::Value;

use crate::{
    context::Context,
    error::ExecError,
    procedure::ProcedureKind,
    router::Router,
    stream::{StopToken, StreamCtx},
};

use super::{
    request_future::RequestFuture,
    subscription::SubscriptionTask,
    subscription_map::SubscriptionMap,
    types::{Request, RequestId, Response},
};

/// What dispatching one request produced.
#[derive(Debug)]
pub enum ExecutorResult {
    /// An immediate response, available without running any handler.
    Response(Response),
    /// A read/write call in flight; resolves to exactly one response.
    Future(RequestFuture),
    /// A subscription session; a stream of frames to be driven until it ends.
    Task(SubscriptionTask),
}

impl Router {
    /// Resolves and executes one call.
    ///
    /// `make_ctx` is only invoked once the call has passed resolution, kind
    /// checking and input validation. `subscriptions` is the connection's
    /// session registry; passing `None` declares that the transport cannot
    /// carry subscriptions, and `stream`/`stream-stop` requests will be
    /// rejected.
    ///
    /// A `None` return means there is nothing to send back: the request was a
    /// successful `stream-stop`, which is acknowledged by the stopping
    /// session's own `stopped` frame.
    pub fn dispatch(
        &self,
        make_ctx: impl FnOnce() -> Context,
        request: Request,
        subscriptions: Option<&mut SubscriptionMap>,
    ) -> Option<ExecutorResult> {
        match request {
            Request::Read { id, path, input } => {
                Some(self.exec_resolver(make_ctx, ProcedureKind::Read, id, path, input))
            }
            Request::Write { id, path, input } => {
                Some(self.exec_resolver(make_ctx, ProcedureKind::Write, id, path, input))
            }
            Request::Stream {
                id,
                path,
                input,
                last_event_id,
            } => Some(self.exec_stream(make_ctx, id, path, input, last_event_id, subscriptions)),
            Request::StreamStop { id } => self.exec_stop(id, subscriptions),
        }
    }

    fn exec_resolver(
        &self,
        make_ctx: impl FnOnce() -> Context,
        kind: ProcedureKind,
        id: RequestId,
        path: Cow<'static, str>,
        input: Option<Value>,
    ) -> ExecutorResult {
        let expose = self.expose_errors();

        let procedure = match self.get(&path) {
            Some(procedure) => procedure,
            None => {
                return ExecutorResult::Response(Response::error(
                    id,
                    ExecError::ProcedureNotFound(path.clone()).into(),
                    Some(path),
                    expose,
                ))
            }
        };

        if procedure.kind() != kind {
            return ExecutorResult::Response(Response::error(
                id,
                ExecError::KindMismatch {
                    path: path.clone(),
                    expected: procedure.kind(),
                    requested: kind,
                }
                .into(),
                Some(path),
                expose,
            ));
        }

        // Middleware-zero: a rejected input never reaches user middleware.
        let input = match procedure.validate_input(input.unwrap_or(Value::Null)) {
            Ok(input) => input,
            Err(issues) => {
                return ExecutorResult::Response(Response::error(
                    id,
                    ExecError::InputValidation(issues).into(),
                    Some(path),
                    expose,
                ))
            }
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(path = %path, kind = %kind, "dispatching procedure call");

        let chain = procedure.call(make_ctx(), input);
        let output = procedure.output_validator();
        ExecutorResult::Future(RequestFuture::new(id, path, chain, output, expose))
    }

    fn exec_stream(
        &self,
        make_ctx: impl FnOnce() -> Context,
        id: RequestId,
        path: Cow<'static, str>,
        input: Option<Value>,
        last_event_id: Option<String>,
        subscriptions: Option<&mut SubscriptionMap>,
    ) -> ExecutorResult {
        let expose = self.expose_errors();

        let subscriptions = match subscriptions {
            Some(subscriptions) => subscriptions,
            None => {
                return ExecutorResult::Response(Response::error(
                    id,
                    ExecError::SubscriptionsNotSupported.into(),
                    Some(path),
                    expose,
                ))
            }
        };

        if subscriptions.contains_key(&id) {
            return ExecutorResult::Response(Response::error(
                id,
                ExecError::SubscriptionDuplicateId.into(),
                Some(path),
                expose,
            ));
        }

        let procedure = match self.get(&path) {
            Some(procedure) => procedure,
            None => {
                return ExecutorResult::Response(Response::error(
                    id,
                    ExecError::ProcedureNotFound(path.clone()).into(),
                    Some(path),
                    expose,
                ))
            }
        };

        if procedure.kind() != ProcedureKind::Stream {
            return ExecutorResult::Response(Response::error(
                id,
                ExecError::KindMismatch {
                    path: path.clone(),
                    expected: procedure.kind(),
                    requested: ProcedureKind::Stream,
                }
                .into(),
                Some(path),
                expose,
            ));
        }

        let input = match procedure.validate_input(input.unwrap_or(Value::Null)) {
            Ok(input) => input,
            Err(issues) => {
                return ExecutorResult::Response(Response::error(
                    id,
                    ExecError::InputValidation(issues).into(),
                    Some(path),
                    expose,
                ))
            }
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(path = %path, last_event_id = ?last_event_id, "starting subscription");

        let stop = StopToken::new();
        subscriptions.insert(id.clone(), stop.clone());

        let chain = procedure.call_stream(
            make_ctx(),
            input,
            StreamCtx::new(last_event_id, stop.clone()),
        );
        ExecutorResult::Task(SubscriptionTask::new(
            id,
            path,
            chain,
            procedure.output_validator(),
            stop,
            expose,
        ))
    }

    fn exec_stop(
        &self,
        id: RequestId,
        subscriptions: Option<&mut SubscriptionMap>,
    ) -> Option<ExecutorResult> {
        let err = match subscriptions {
            None => ExecError::SubscriptionsNotSupported,
            Some(subscriptions) => {
                if subscriptions.shutdown(&id) {
                    return None;
                }
                ExecError::SubscriptionNotFound
            }
        };

        Some(ExecutorResult::Response(Response::error(
            id,
            err.into(),
            None,
            self.expose_errors(),
        )))
    }
}
