use std::{future, sync::Arc};

use futures::Stream;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    context::Context,
    error::{Error, ExecError},
    middleware::{ChainFut, ChainTerminal, Middleware, ProcedureOutput},
    stream::{EventStream, StreamCtx, TrackedEvent},
};

use super::{Handler, Procedure, ProcedureKind, StreamResolver, Validator};

/// A persistent, append-only builder for [`Procedure`]s.
///
/// Every step borrows the receiver and returns a new builder containing all
/// prior steps plus the new one; previously returned builders are never
/// mutated. That makes a builder safe to keep around as a shared base:
///
/// ```ignore
/// let authed = Procedure::builder().with(require_auth());
/// let me = authed.clone().read(|ctx, _: ()| async move { ... });
/// let rename = authed.with(audit_log()).write(|ctx, name: String| async move { ... });
/// ```
///
/// The terminal step (`read`/`write`/`stream`) consumes the builder and
/// freezes the definition; a frozen [`Procedure`] offers no way to attach
/// further middleware or validators.
#[derive(Clone, Default)]
pub struct ProcedureBuilder {
    middleware: Vec<Middleware>,
    input: Option<Validator>,
    output: Option<Validator>,
}

impl ProcedureBuilder {
    /// Appends `middleware` after everything attached so far. Declared order
    /// is execution order, outermost first.
    pub fn with(&self, middleware: Middleware) -> Self {
        let mut next = self.clone();
        next.middleware.push(middleware);
        next
    }

    /// Sets the input validator. Runs before any middleware; rejection maps
    /// to `BAD_REQUEST` with the validator's issues attached.
    pub fn input(&self, validator: Validator) -> Self {
        let mut next = self.clone();
        next.input = Some(validator);
        next
    }

    /// Sets the output validator. A rejection here means the procedure broke
    /// its own contract and maps to `INTERNAL`.
    pub fn output(&self, validator: Validator) -> Self {
        let mut next = self.clone();
        next.output = Some(validator);
        next
    }

    /// Freezes the builder into a read procedure.
    pub fn read<TArg, TOk, TFut, F>(self, resolver: F) -> Procedure
    where
        F: Fn(Context, TArg) -> TFut + Send + Sync + 'static,
        TArg: DeserializeOwned + 'static,
        TOk: Serialize,
        TFut: future::Future<Output = Result<TOk, Error>> + Send + 'static,
    {
        self.resolver(ProcedureKind::Read, resolver)
    }

    /// Freezes the builder into a write procedure.
    pub fn write<TArg, TOk, TFut, F>(self, resolver: F) -> Procedure
    where
        F: Fn(Context, TArg) -> TFut + Send + Sync + 'static,
        TArg: DeserializeOwned + 'static,
        TOk: Serialize,
        TFut: future::Future<Output = Result<TOk, Error>> + Send + 'static,
    {
        self.resolver(ProcedureKind::Write, resolver)
    }

    /// Freezes the builder into a streaming procedure.
    ///
    /// The resolver receives a [`StreamCtx`] carrying the caller's resume
    /// cursor and the session's [`StopToken`](crate::StopToken); it must
    /// check the token at its yield points and replay deterministically from
    /// `last_event_id` when one is supplied.
    pub fn stream<TArg, TStream, F>(self, resolver: F) -> Procedure
    where
        F: Fn(Context, TArg, StreamCtx) -> TStream + Send + Sync + 'static,
        TArg: DeserializeOwned + 'static,
        TStream: Stream<Item = Result<TrackedEvent, Error>> + Send + 'static,
    {
        let handler: StreamResolver = Arc::new(move |ctx, input, stream_ctx| -> EventStream {
            match serde_json::from_value::<TArg>(input) {
                Ok(arg) => Box::pin(resolver(ctx, arg, stream_ctx)),
                Err(err) => Box::pin(futures::stream::once(future::ready(Err(
                    ExecError::DeserializingInput(err).into(),
                )))),
            }
        });

        Procedure::new(
            ProcedureKind::Stream,
            self.middleware.into(),
            self.input,
            self.output,
            Handler::Stream(handler),
        )
    }

    fn resolver<TArg, TOk, TFut, F>(self, kind: ProcedureKind, resolver: F) -> Procedure
    where
        F: Fn(Context, TArg) -> TFut + Send + Sync + 'static,
        TArg: DeserializeOwned + 'static,
        TOk: Serialize,
        TFut: future::Future<Output = Result<TOk, Error>> + Send + 'static,
    {
        let terminal: ChainTerminal = Arc::new(move |ctx, input| -> ChainFut {
            let arg = match serde_json::from_value::<TArg>(input) {
                Ok(arg) => arg,
                Err(err) => {
                    return Box::pin(future::ready(Err(
                        ExecError::DeserializingInput(err).into()
                    )))
                }
            };

            let fut = resolver(ctx, arg);
            Box::pin(async move {
                let ok = fut.await?;
                serde_json::to_value(ok)
                    .map(ProcedureOutput::Value)
                    .map_err(|err| ExecError::SerializingResult(err).into())
            })
        });

        Procedure::new(
            kind,
            self.middleware.into(),
            self.input,
            self.output,
            Handler::Resolver(terminal),
        )
    }
}
