//! routerpc
//!
//! A procedure dispatch engine for typed RPC: a static router tree flattened
//! to a path → procedure map, an onion-model middleware chain over an
//! immutable layered [`Context`], and tracked, resumable subscription
//! sessions, all behind the small wire contract in [`exec`].
//!
//! Transports are collaborators, not part of this crate: anything that can
//! turn its native framing into [`exec::Request`]s and deliver
//! [`exec::Response`]s (HTTP batch, WebSocket, an in-process caller) can sit
//! in front of a [`Connection`](exec::Connection).
//!
//! ```ignore
//! let router = RouterBuilder::new()
//!     .nest(
//!         "posts",
//!         RouterBuilder::new().procedure(
//!             "list",
//!             Procedure::builder().read(|_ctx, _: ()| async move {
//!                 Ok::<_, Error>(vec!["hello"])
//!             }),
//!         ),
//!     )
//!     .build()?
//!     .arced();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

mod context;
mod error;
mod middleware;
mod procedure;
mod router;
mod stream;

pub mod exec;

pub use context::Context;
pub use error::{BuildError, Error, ErrorCode};
pub use middleware::{Middleware, Next, ProcedureOutput};
pub use procedure::{
    Procedure, ProcedureBuilder, ProcedureKind, ValidationIssue, ValidationIssues, Validator,
};
pub use router::{Router, RouterBuilder};
pub use stream::{EventStream, StopToken, StreamCtx, TrackedEvent};
