#![allow(dead_code)]

use std::sync::Arc;

use routerpc::{
    exec::{ExecutorResult, Request, Response, ResponseError, ResponseInner, ResultFrame, SubscriptionMap},
    Context, Router,
};
use serde_json::Value;

/// Dispatches one read/write request against a fresh context and drives it to
/// its single response.
pub async fn exec(router: &Arc<Router>, req: Request) -> Option<Response> {
    exec_with_ctx(router, Context::new, req).await
}

pub async fn exec_with_ctx(
    router: &Arc<Router>,
    make_ctx: impl FnOnce() -> Context,
    req: Request,
) -> Option<Response> {
    let mut subscriptions = SubscriptionMap::default();
    match router.dispatch(make_ctx, req, Some(&mut subscriptions))? {
        ExecutorResult::Response(response) => Some(response),
        ExecutorResult::Future(fut) => Some(fut.await),
        ExecutorResult::Task(_) => panic!("expected a request, got a subscription session"),
    }
}

pub fn expect_data(response: Response) -> Value {
    match response.inner {
        ResponseInner::Result(ResultFrame::Data { data }) => data,
        other => panic!("expected a data frame, got {other:?}"),
    }
}

pub fn expect_error(response: Response) -> ResponseError {
    match response.inner {
        ResponseInner::Error(error) => error,
        other => panic!("expected an error frame, got {other:?}"),
    }
}
