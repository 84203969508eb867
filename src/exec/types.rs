use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{Error, ErrorCode},
    procedure::ValidationIssue,
    stream::TrackedEvent,
};

/// The caller-chosen correlation token, unique per open call on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(v: u64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for RequestId {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// One inbound call, as normalized by a transport adapter.
///
/// On the wire this is `{ id, kind, path, input? }` with `kind` one of
/// `"read" | "write" | "stream" | "stream-stop"`; `stream` requests may also
/// carry a `lastEventId` resume cursor after a reconnect.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Request {
    Read {
        id: RequestId,
        path: Cow<'static, str>,
        #[serde(default)]
        input: Option<Value>,
    },
    Write {
        id: RequestId,
        path: Cow<'static, str>,
        #[serde(default)]
        input: Option<Value>,
    },
    Stream {
        id: RequestId,
        path: Cow<'static, str>,
        #[serde(default)]
        input: Option<Value>,
        #[serde(default, rename = "lastEventId")]
        last_event_id: Option<String>,
    },
    StreamStop {
        id: RequestId,
    },
}

impl Request {
    pub fn id(&self) -> &RequestId {
        match self {
            Request::Read { id, .. }
            | Request::Write { id, .. }
            | Request::Stream { id, .. }
            | Request::StreamStop { id } => id,
        }
    }

    /// Parses one physical frame which may hold a single request or a batch.
    /// Batched requests stay fully independent from here on.
    pub fn parse_batch(value: Value) -> Result<Vec<Request>, serde_json::Error> {
        if value.is_array() {
            serde_json::from_value(value)
        } else {
            serde_json::from_value(value).map(|req| vec![req])
        }
    }
}

/// One outbound frame, correlated to its call by `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: RequestId,
    #[serde(flatten)]
    pub inner: ResponseInner,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseInner {
    Result(ResultFrame),
    Error(ResponseError),
}

/// The `result` half of a response.
///
/// Read/write calls only ever produce `data`; subscription sessions wrap
/// their event data between a `started` and a `stopped` frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResultFrame {
    Started,
    Data { data: Value },
    Stopped,
}

impl Response {
    pub(crate) fn data(id: RequestId, data: Value) -> Self {
        Self {
            id,
            inner: ResponseInner::Result(ResultFrame::Data { data }),
        }
    }

    pub(crate) fn started(id: RequestId) -> Self {
        Self {
            id,
            inner: ResponseInner::Result(ResultFrame::Started),
        }
    }

    pub(crate) fn stopped(id: RequestId) -> Self {
        Self {
            id,
            inner: ResponseInner::Result(ResultFrame::Stopped),
        }
    }

    pub(crate) fn event(id: RequestId, event: TrackedEvent) -> Self {
        Self::data(
            id,
            serde_json::json!({ "eventId": event.event_id, "payload": event.payload }),
        )
    }

    pub(crate) fn error(
        id: RequestId,
        error: Error,
        path: Option<Cow<'static, str>>,
        expose_cause: bool,
    ) -> Self {
        Self {
            id,
            inner: ResponseInner::Error(ResponseError::from_error(error, path, expose_cause)),
        }
    }
}

/// The wire rendition of an [`Error`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Cow<'static, str>>,
    /// Per-field detail for `BAD_REQUEST` validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<ValidationIssue>>,
    /// The formatted cause chain. Only populated when the router was built
    /// with `expose_errors(true)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ResponseError {
    /// The error mapper: collapses any failure into the closed taxonomy and
    /// decides what diagnostic detail may leave the process.
    pub(crate) fn from_error(
        error: Error,
        path: Option<Cow<'static, str>>,
        expose_cause: bool,
    ) -> Self {
        let issues = error
            .cause()
            .and_then(|cause| cause.downcast_ref::<crate::procedure::ValidationIssues>())
            .filter(|_| error.code() == ErrorCode::BadRequest)
            .map(|issues| issues.0.clone());

        let stack = match expose_cause {
            true => error.cause().map(|cause| format!("{cause:?}")),
            false => None,
        };

        Self {
            code: error.code(),
            message: error.message().to_string(),
            data: Some(ErrorData {
                http_status: error.code().to_status_code(),
                path,
                issues,
                stack,
            }),
        }
    }
}

/// A server-initiated, id-less notice.
///
/// `reconnect` tells every open subscription on the connection to
/// re-establish itself with its last-seen event id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerNotice {
    Reconnect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_kinds_deserialize_from_the_wire_tags() {
        let reqs = Request::parse_batch(json!([
            { "kind": "read", "id": 1, "path": "posts.list" },
            { "kind": "write", "id": "w1", "path": "posts.create", "input": { "title": "hi" } },
            { "kind": "stream", "id": 2, "path": "posts.feed", "lastEventId": "7" },
            { "kind": "stream-stop", "id": 2 },
        ]))
        .unwrap();

        assert!(matches!(&reqs[0], Request::Read { id: RequestId::Number(1), .. }));
        assert!(matches!(&reqs[1], Request::Write { input: Some(_), .. }));
        assert!(
            matches!(&reqs[2], Request::Stream { last_event_id: Some(cursor), .. } if cursor == "7")
        );
        assert!(matches!(&reqs[3], Request::StreamStop { .. }));
    }

    #[test]
    fn single_request_parses_as_a_batch_of_one() {
        let reqs =
            Request::parse_batch(json!({ "kind": "read", "id": 1, "path": "posts.list" })).unwrap();
        assert_eq!(reqs.len(), 1);
    }

    #[test]
    fn response_frames_match_the_wire_contract() {
        assert_eq!(
            serde_json::to_value(Response::started(RequestId::Number(4))).unwrap(),
            json!({ "id": 4, "result": { "type": "started" } })
        );
        assert_eq!(
            serde_json::to_value(Response::data(RequestId::Number(4), json!([1, 2]))).unwrap(),
            json!({ "id": 4, "result": { "type": "data", "data": [1, 2] } })
        );
        assert_eq!(
            serde_json::to_value(Response::stopped(RequestId::String("s".into()))).unwrap(),
            json!({ "id": "s", "result": { "type": "stopped" } })
        );
    }

    #[test]
    fn reconnect_notice_has_no_id() {
        assert_eq!(
            serde_json::to_value(ServerNotice::Reconnect).unwrap(),
            json!({ "type": "reconnect" })
        );
    }
}
