use std::{
    borrow::Cow,
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use crate::{
    error::{Error, ExecError},
    middleware::{BoxFuture, ChainFut, ProcedureOutput},
    procedure::Validator,
};

use super::types::{RequestId, Response};

/// An in-flight read/write call. Resolves to exactly one [`Response`]; the
/// middleware chain, output validation and error mapping all happen inside.
pub struct RequestFuture {
    id: RequestId,
    fut: BoxFuture<Response>,
}

impl RequestFuture {
    pub(crate) fn new(
        id: RequestId,
        path: Cow<'static, str>,
        chain: ChainFut,
        output: Option<Validator>,
        expose_errors: bool,
    ) -> Self {
        let response_id = id.clone();
        let fut = Box::pin(async move {
            let result = match chain.await {
                Ok(ProcedureOutput::Value(value)) => match &output {
                    Some(validator) => validator
                        .check(value)
                        .map_err(|issues| Error::from(ExecError::OutputValidation(issues))),
                    None => Ok(value),
                },
                Ok(ProcedureOutput::Events(_)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        path = %path,
                        "middleware replaced a value result with an event stream"
                    );

                    Err(ExecError::ContractViolation(
                        "middleware replaced a value result with an event stream",
                    )
                    .into())
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(value) => Response::data(response_id, value),
                Err(err) => Response::error(response_id, err, Some(path), expose_errors),
            }
        });

        Self { id, fut }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl fmt::Debug for RequestFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFuture").field("id", &self.id).finish()
    }
}

impl Future for RequestFuture {
    type Output = Response;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.fut.as_mut().poll(cx)
    }
}
