//! The runtime side of the engine: wire types, the dispatcher, and the
//! per-connection machinery that owns subscription sessions.

mod connection;
mod execute;
mod request_future;
mod subscription;
mod subscription_map;
mod types;

pub use connection::{Connection, ContextFactory};
pub use execute::ExecutorResult;
pub use request_future::RequestFuture;
pub use subscription::{SessionState, SubscriptionTask};
pub use subscription_map::SubscriptionMap;
pub use types::{
    ErrorData, Request, RequestId, Response, ResponseError, ResponseInner, ResultFrame,
    ServerNotice,
};
