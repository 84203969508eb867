use std::{error, fmt, sync::Arc};

use serde::Serialize;
use serde_json::Value;

/// One field-level complaint produced by a [`Validator`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending field within the input, or `""` for the
    /// input as a whole.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// The full set of issues a validator found. Surfaced verbatim in the `data`
/// of a `BAD_REQUEST` response so the caller can correct its input.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationIssues(pub Vec<ValidationIssue>);

impl ValidationIssues {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![ValidationIssue::new(path, message)])
    }
}

impl fmt::Display for ValidationIssues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            if issue.path.is_empty() {
                write!(f, "{}", issue.message)?;
            } else {
                write!(f, "{}: {}", issue.path, issue.message)?;
            }
        }
        Ok(())
    }
}

impl error::Error for ValidationIssues {}

/// A runtime check (and optional normalization) applied to a raw payload.
///
/// Attached via [`ProcedureBuilder::input`](super::ProcedureBuilder::input)
/// or [`output`](super::ProcedureBuilder::output). Input validation runs
/// before any middleware; output validation runs on what the handler
/// produced, and a failure there is the implementation's bug, not the
/// caller's.
#[derive(Clone)]
pub struct Validator {
    check: Arc<dyn Fn(Value) -> Result<Value, ValidationIssues> + Send + Sync>,
}

impl Validator {
    pub fn new(
        check: impl Fn(Value) -> Result<Value, ValidationIssues> + Send + Sync + 'static,
    ) -> Self {
        Self {
            check: Arc::new(check),
        }
    }

    pub(crate) fn check(&self, value: Value) -> Result<Value, ValidationIssues> {
        (self.check)(value)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator").finish()
    }
}
