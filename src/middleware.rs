use std::{fmt, future::Future, pin::Pin, sync::Arc};

use serde_json::Value;

use crate::{context::Context, error::Error, stream::EventStream};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What the innermost layer of the onion resolved to: a single value for
/// read/write procedures, an event stream for streaming ones.
pub enum ProcedureOutput {
    Value(Value),
    Events(EventStream),
}

impl fmt::Debug for ProcedureOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Events(_) => f.debug_tuple("Events").finish(),
        }
    }
}

pub(crate) type ChainFut = BoxFuture<Result<ProcedureOutput, Error>>;
pub(crate) type ChainTerminal = Arc<dyn Fn(Context, Value) -> ChainFut + Send + Sync>;
type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> ChainFut + Send + Sync>;

/// A composable wrapper around procedure execution.
///
/// A middleware receives the call's [`Context`] and a [`Next`] token. It must
/// either run the remainder of the chain exactly once via [`Next::exec`]
/// (optionally extending the context first) and propagate the result upward,
/// or short-circuit by returning its own error or result without calling it.
/// `Next` is consumed by value and is not `Clone`, so running the inner chain
/// twice from one invocation is unrepresentable.
///
/// ```ignore
/// let require_auth = Middleware::new(|ctx: Context, next: Next| async move {
///     match ctx.get::<Session>("session") {
///         Some(_) => next.exec(ctx).await,
///         None => Err(Error::new(ErrorCode::Unauthorized, "missing session".into())),
///     }
/// });
/// ```
#[derive(Clone)]
pub struct Middleware {
    handler: MiddlewareHandler,
}

impl Middleware {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ProcedureOutput, Error>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |ctx, next| Box::pin(func(ctx, next))),
        }
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware").finish()
    }
}

/// Continuation for the rest of a middleware chain.
///
/// Holds the not-yet-run tail of the chain plus the terminal handler and the
/// (already validated) call input. The input travels here rather than through
/// the middleware signature: middleware inspect and extend context, they do
/// not see the payload.
pub struct Next {
    chain: Arc<[Middleware]>,
    index: usize,
    terminal: ChainTerminal,
    input: Value,
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("index", &self.index).finish()
    }
}

impl Next {
    /// Runs the remaining middleware and the handler with `ctx` as the
    /// context they observe. Pass the context through unchanged or extend it
    /// with [`Context::with_value`] first; the layers added here are never
    /// visible to the middleware above this one.
    pub async fn exec(self, ctx: Context) -> Result<ProcedureOutput, Error> {
        match self.chain.get(self.index) {
            Some(mw) => {
                let handler = mw.handler.clone();
                let next = Next {
                    chain: self.chain,
                    index: self.index + 1,
                    terminal: self.terminal,
                    input: self.input,
                };
                (handler)(ctx, next).await
            }
            None => (self.terminal)(ctx, self.input).await,
        }
    }
}

/// Kicks off the onion: declared middleware order, outermost first, with the
/// terminal handler at the center.
pub(crate) fn execute_chain(
    chain: Arc<[Middleware]>,
    terminal: ChainTerminal,
    ctx: Context,
    input: Value,
) -> ChainFut {
    Box::pin(
        Next {
            chain,
            index: 0,
            terminal,
            input,
        }
        .exec(ctx),
    )
}
