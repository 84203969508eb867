use std::{borrow::Cow, error, fmt, sync::Arc};

use serde::Serialize;

use crate::procedure::{ProcedureKind, ValidationIssues};

/// The closed set of error codes a dispatch can terminate with.
///
/// Every failure that crosses the external interface is tagged with exactly
/// one of these; unrecognized failures are wrapped as [`ErrorCode::Internal`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotSupported,
    Timeout,
    Conflict,
    PreconditionFailed,
    TooManyRequests,
    Internal,
}

impl ErrorCode {
    pub fn to_status_code(&self) -> u16 {
        match self {
            ErrorCode::BadRequest => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::MethodNotSupported => 405,
            ErrorCode::Timeout => 408,
            ErrorCode::Conflict => 409,
            ErrorCode::PreconditionFailed => 412,
            ErrorCode::TooManyRequests => 429,
            ErrorCode::Internal => 500,
        }
    }

    pub const fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            400 => Some(ErrorCode::BadRequest),
            401 => Some(ErrorCode::Unauthorized),
            403 => Some(ErrorCode::Forbidden),
            404 => Some(ErrorCode::NotFound),
            405 => Some(ErrorCode::MethodNotSupported),
            408 => Some(ErrorCode::Timeout),
            409 => Some(ErrorCode::Conflict),
            412 => Some(ErrorCode::PreconditionFailed),
            429 => Some(ErrorCode::TooManyRequests),
            500 => Some(ErrorCode::Internal),
            _ => None,
        }
    }
}

/// An error produced by a handler, a middleware, or the engine itself.
///
/// Middleware may catch a lower layer's `Error` and re-throw one with a
/// different code (e.g. translate a storage conflict into
/// [`ErrorCode::Conflict`]); the executor propagates whatever code it is
/// handed without rewriting it.
#[derive(Clone)]
pub struct Error {
    code: ErrorCode,
    message: String,
    // `Arc` rather than `Box` so the error stays `Clone`.
    cause: Option<Arc<dyn error::Error + Send + Sync>>,
}

impl Error {
    pub const fn new(code: ErrorCode, message: String) -> Self {
        Self {
            code,
            message,
            cause: None,
        }
    }

    pub fn with_cause<TErr>(code: ErrorCode, message: String, cause: TErr) -> Self
    where
        TErr: error::Error + Send + Sync + 'static,
    {
        Self {
            code,
            message,
            cause: Some(Arc::new(cause)),
        }
    }

    /// Shorthand for wrapping a failure the taxonomy has no better name for.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message.into())
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn cause(&self) -> Option<&(dyn error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message
    }
}

impl Eq for Error {}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("code", &self.code)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "routerpc::Error {{ code: {:?}, message: {} }}",
            self.code, self.message
        )
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.cause.as_ref().map(|c| &**c as _)
    }
}

/// Failures raised by the dispatch machinery itself, before or around the
/// user's handler. Converted into a public [`Error`] at the boundary.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub(crate) enum ExecError {
    #[error("no procedure is registered at '{0}'")]
    ProcedureNotFound(Cow<'static, str>),
    #[error("'{path}' is a {expected} procedure and cannot be called as a {requested}")]
    KindMismatch {
        path: Cow<'static, str>,
        expected: ProcedureKind,
        requested: ProcedureKind,
    },
    #[error("error deserializing procedure input: {0}")]
    DeserializingInput(serde_json::Error),
    #[error("error serializing procedure result: {0}")]
    SerializingResult(serde_json::Error),
    #[error("input validation failed: {0}")]
    InputValidation(ValidationIssues),
    #[error("procedure produced output violating its declared contract: {0}")]
    OutputValidation(ValidationIssues),
    #[error("a subscription with this id is already active on the connection")]
    SubscriptionDuplicateId,
    #[error("no active subscription with this id")]
    SubscriptionNotFound,
    #[error("the current transport does not support subscriptions")]
    SubscriptionsNotSupported,
    #[error("middleware contract violation: {0}")]
    ContractViolation(&'static str),
}

impl From<ExecError> for Error {
    fn from(v: ExecError) -> Self {
        let code = match &v {
            ExecError::ProcedureNotFound(_) => ErrorCode::NotFound,
            ExecError::KindMismatch { .. } => ErrorCode::MethodNotSupported,
            ExecError::DeserializingInput(_) | ExecError::InputValidation(_) => {
                ErrorCode::BadRequest
            }
            ExecError::SerializingResult(_)
            | ExecError::OutputValidation(_)
            | ExecError::ContractViolation(_) => ErrorCode::Internal,
            ExecError::SubscriptionDuplicateId
            | ExecError::SubscriptionNotFound
            | ExecError::SubscriptionsNotSupported => ErrorCode::BadRequest,
        };

        // A failed output check or result serialization is the server's own
        // bug; its detail stays in the cause (surfaced via `stack` in debug
        // mode) and never in the caller-facing message.
        let message = match &v {
            ExecError::SerializingResult(_) | ExecError::OutputValidation(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        match v {
            // Keep the structured issues around so the error mapper can
            // surface per-field detail on BAD_REQUEST responses.
            ExecError::InputValidation(issues) => Error::with_cause(code, message, issues),
            ExecError::OutputValidation(issues) => Error::with_cause(code, message, issues),
            ExecError::DeserializingInput(err) => Error::with_cause(code, message, err),
            ExecError::SerializingResult(err) => Error::with_cause(code, message, err),
            _ => Error::new(code, message),
        }
    }
}

/// A mistake in how the router was assembled. Raised by
/// [`RouterBuilder::build`](crate::RouterBuilder::build) before any call is
/// served; this is a programmer error, not a runtime condition.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BuildError {
    #[error("two procedures were registered at the path '{path}'")]
    DuplicatePath { path: String },
    #[error("'{segment}' is not a valid path segment (segments must be non-empty and must not contain '.')")]
    InvalidSegment { segment: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for code in [
            ErrorCode::BadRequest,
            ErrorCode::Unauthorized,
            ErrorCode::Forbidden,
            ErrorCode::NotFound,
            ErrorCode::MethodNotSupported,
            ErrorCode::Timeout,
            ErrorCode::Conflict,
            ErrorCode::PreconditionFailed,
            ErrorCode::TooManyRequests,
            ErrorCode::Internal,
        ] {
            assert_eq!(ErrorCode::from_status_code(code.to_status_code()), Some(code));
        }
    }

    #[test]
    fn codes_serialize_as_screaming_snake_case() {
        assert_eq!(
            serde_json::to_value(ErrorCode::MethodNotSupported).unwrap(),
            serde_json::json!("METHOD_NOT_SUPPORTED")
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::Internal).unwrap(),
            serde_json::json!("INTERNAL")
        );
    }
}
