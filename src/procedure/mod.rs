mod builder;
mod validator;

use std::{fmt, future, sync::Arc};

use serde_json::Value;

use crate::{
    context::Context,
    error::ExecError,
    middleware::{execute_chain, ChainFut, ChainTerminal, Middleware, ProcedureOutput},
    stream::{EventStream, StreamCtx},
};

pub use builder::ProcedureBuilder;
pub use validator::{ValidationIssue, ValidationIssues, Validator};

/// Which of the three call shapes a procedure answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    /// A side-effect-free request/response call.
    Read,
    /// A state-changing request/response call.
    Write,
    /// A long-lived call producing a sequence of tracked events.
    Stream,
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcedureKind::Read => "read",
            ProcedureKind::Write => "write",
            ProcedureKind::Stream => "stream",
        })
    }
}

pub(crate) type StreamResolver = Arc<dyn Fn(Context, Value, StreamCtx) -> EventStream + Send + Sync>;

pub(crate) enum Handler {
    Resolver(ChainTerminal),
    Stream(StreamResolver),
}

/// One callable unit: validators, middleware list and handler, frozen.
///
/// Built with [`Procedure::builder`], owned by the [`Router`](crate::Router)
/// for the life of the process and never mutated after construction.
pub struct Procedure {
    kind: ProcedureKind,
    middleware: Arc<[Middleware]>,
    input: Option<Validator>,
    output: Option<Validator>,
    handler: Handler,
}

impl Procedure {
    pub fn builder() -> ProcedureBuilder {
        ProcedureBuilder::default()
    }

    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    pub(crate) fn new(
        kind: ProcedureKind,
        middleware: Arc<[Middleware]>,
        input: Option<Validator>,
        output: Option<Validator>,
        handler: Handler,
    ) -> Self {
        Self {
            kind,
            middleware,
            input,
            output,
            handler,
        }
    }

    /// Middleware-zero: runs before the chain is even constructed, so a
    /// rejected input never reaches user middleware.
    pub(crate) fn validate_input(&self, input: Value) -> Result<Value, ValidationIssues> {
        match &self.input {
            Some(validator) => validator.check(input),
            None => Ok(input),
        }
    }

    pub(crate) fn output_validator(&self) -> Option<Validator> {
        self.output.clone()
    }

    /// Executes a read/write call: full middleware chain around the resolver.
    /// The returned future owns everything it needs and is `'static`.
    pub(crate) fn call(&self, ctx: Context, input: Value) -> ChainFut {
        match &self.handler {
            Handler::Resolver(terminal) => {
                execute_chain(self.middleware.clone(), terminal.clone(), ctx, input)
            }
            Handler::Stream(_) => Box::pin(future::ready(Err(ExecError::ContractViolation(
                "stream procedure invoked without a subscription session",
            )
            .into()))),
        }
    }

    /// Executes a stream call. The chain resolves to the event stream rather
    /// than a value; `stream_ctx` (resume cursor + stop token) is threaded
    /// into the handler at the center of the onion.
    pub(crate) fn call_stream(&self, ctx: Context, input: Value, stream_ctx: StreamCtx) -> ChainFut {
        match &self.handler {
            Handler::Stream(resolver) => {
                let resolver = resolver.clone();
                let terminal: ChainTerminal = Arc::new(move |ctx, input| -> ChainFut {
                    let events = resolver(ctx, input, stream_ctx.clone());
                    Box::pin(future::ready(Ok(ProcedureOutput::Events(events))))
                });
                execute_chain(self.middleware.clone(), terminal, ctx, input)
            }
            Handler::Resolver(_) => Box::pin(future::ready(Err(ExecError::ContractViolation(
                "read/write procedure invoked as a subscription",
            )
            .into()))),
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("kind", &self.kind)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}
