use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use routerpc::{
    exec::{Connection, Request, RequestId},
    Context, Error, ErrorCode, Middleware, Procedure, RouterBuilder, ValidationIssues, Validator,
};
use serde_json::{json, Value};

mod utils;
use utils::*;

fn read_req(id: u64, path: &'static str, input: Option<Value>) -> Request {
    Request::Read {
        id: RequestId::Number(id),
        path: path.into(),
        input,
    }
}

fn write_req(id: u64, path: &'static str, input: Option<Value>) -> Request {
    Request::Write {
        id: RequestId::Number(id),
        path: path.into(),
        input,
    }
}

#[tokio::test]
async fn read_call_resolves_to_a_data_frame() {
    let router = RouterBuilder::new()
        .procedure(
            "echo",
            Procedure::builder().read(|_ctx, input: String| async move { Ok::<_, Error>(input) }),
        )
        .build()
        .unwrap()
        .arced();

    let resp = exec(&router, read_req(1, "echo", Some(json!("hi")))).await.unwrap();
    assert_eq!(resp.id, RequestId::Number(1));
    assert_eq!(expect_data(resp), json!("hi"));
}

#[tokio::test]
async fn unknown_path_yields_not_found() {
    let router = RouterBuilder::new().build().unwrap().arced();

    let err = expect_error(exec(&router, read_req(1, "ghost", None)).await.unwrap());
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(err.data.as_ref().unwrap().http_status, 404);
    assert_eq!(err.data.as_ref().unwrap().path.as_deref(), Some("ghost"));
}

#[tokio::test]
async fn kind_mismatch_yields_method_not_supported() {
    let router = RouterBuilder::new()
        .procedure(
            "posts.list",
            Procedure::builder().read(|_ctx, _: ()| async move { Ok::<_, Error>(()) }),
        )
        .build();
    // "posts.list" contains a separator; register properly nested instead.
    assert!(router.is_err());

    let router = RouterBuilder::new()
        .nest(
            "posts",
            RouterBuilder::new().procedure(
                "list",
                Procedure::builder().read(|_ctx, _: ()| async move { Ok::<_, Error>(()) }),
            ),
        )
        .build()
        .unwrap()
        .arced();

    let err = expect_error(
        exec(&router, write_req(7, "posts.list", None)).await.unwrap(),
    );
    assert_eq!(err.code, ErrorCode::MethodNotSupported);
    assert_eq!(err.data.as_ref().unwrap().http_status, 405);
}

#[tokio::test]
async fn failed_input_validation_rejects_before_any_middleware() {
    let middleware_ran = Arc::new(AtomicBool::new(false));
    let flag = middleware_ran.clone();

    let router = RouterBuilder::new()
        .procedure(
            "create",
            Procedure::builder()
                .input(Validator::new(|input| {
                    match input.get("title").and_then(Value::as_str) {
                        Some(title) if !title.is_empty() => Ok(input),
                        _ => Err(ValidationIssues::single(
                            "title",
                            "must be a non-empty string",
                        )),
                    }
                }))
                .with(Middleware::new(move |ctx, next| {
                    let flag = flag.clone();
                    async move {
                        flag.store(true, Ordering::SeqCst);
                        next.exec(ctx).await
                    }
                }))
                .write(|_ctx, input: Value| async move { Ok::<_, Error>(input) }),
        )
        .build()
        .unwrap()
        .arced();

    let err = expect_error(
        exec(&router, write_req(1, "create", Some(json!({ "title": "" }))))
            .await
            .unwrap(),
    );
    assert_eq!(err.code, ErrorCode::BadRequest);
    let issues = err.data.unwrap().issues.unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].path, "title");
    assert!(!middleware_ran.load(Ordering::SeqCst), "middleware must not run");

    // A valid input flows through the same chain.
    let resp = exec(&router, write_req(2, "create", Some(json!({ "title": "ok" }))))
        .await
        .unwrap();
    assert_eq!(expect_data(resp), json!({ "title": "ok" }));
    assert!(middleware_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn context_extensions_layer_through_the_chain() {
    let m1 = Middleware::new(|ctx: Context, next| async move {
        assert!(!ctx.contains_key("a"), "m1 must see the raw context");
        next.exec(ctx.with_value("a", 1i64)).await
    });
    let m2 = Middleware::new(|ctx: Context, next| async move {
        let a = *ctx.get::<i64>("a").expect("m2 sees m1's extension");
        assert!(!ctx.contains_key("b"));
        next.exec(ctx.with_value("b", a + 1)).await
    });

    let router = RouterBuilder::new()
        .procedure(
            "sum",
            Procedure::builder().with(m1).with(m2).read(|ctx, _: ()| async move {
                let a = *ctx.get::<i64>("a").unwrap();
                let b = *ctx.get::<i64>("b").unwrap();
                Ok::<_, Error>(json!({ "a": a, "b": b }))
            }),
        )
        .build()
        .unwrap()
        .arced();

    let resp = exec(&router, read_req(1, "sum", None)).await.unwrap();
    assert_eq!(expect_data(resp), json!({ "a": 1, "b": 2 }));
}

fn tracing_middleware(name: &'static str) -> Middleware {
    Middleware::new(move |ctx: Context, next| async move {
        let trace = ctx.get::<Arc<Mutex<Vec<&'static str>>>>("trace").unwrap();
        trace.lock().unwrap().push(name);
        next.exec(ctx).await
    })
}

#[tokio::test]
async fn middleware_run_in_declared_order_for_every_call() {
    let router = RouterBuilder::new()
        .procedure(
            "a",
            Procedure::builder()
                .with(tracing_middleware("m1"))
                .with(tracing_middleware("m2"))
                .with(tracing_middleware("m3"))
                .read(|ctx: Context, _: ()| async move {
                    let trace = ctx.get::<Arc<Mutex<Vec<&'static str>>>>("trace").unwrap();
                    trace.lock().unwrap().push("handler");
                    Ok::<_, Error>(())
                }),
        )
        .procedure(
            "b",
            Procedure::builder()
                .with(tracing_middleware("x1"))
                .with(tracing_middleware("x2"))
                .read(|ctx: Context, _: ()| async move {
                    let trace = ctx.get::<Arc<Mutex<Vec<&'static str>>>>("trace").unwrap();
                    trace.lock().unwrap().push("handler");
                    Ok::<_, Error>(())
                }),
        )
        .build()
        .unwrap()
        .arced();

    let trace_a = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let trace_b = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let (ta, tb) = (trace_a.clone(), trace_b.clone());

    // Two independent in-flight calls; each sees its own declared order.
    let (ra, rb) = tokio::join!(
        exec_with_ctx(&router, move || Context::new().with_value("trace", ta), read_req(1, "a", None)),
        exec_with_ctx(&router, move || Context::new().with_value("trace", tb), read_req(2, "b", None)),
    );
    expect_data(ra.unwrap());
    expect_data(rb.unwrap());

    assert_eq!(*trace_a.lock().unwrap(), vec!["m1", "m2", "m3", "handler"]);
    assert_eq!(*trace_b.lock().unwrap(), vec!["x1", "x2", "handler"]);
}

fn require_user() -> Middleware {
    Middleware::new(|ctx: Context, next| async move {
        match ctx.get::<String>("user") {
            Some(_) => next.exec(ctx).await,
            None => Err(Error::new(
                ErrorCode::Unauthorized,
                "this call requires a signed-in user".into(),
            )),
        }
    })
}

#[tokio::test]
async fn a_base_builder_fans_out_without_being_mutated() {
    let handler_ran = Arc::new(AtomicBool::new(false));
    let flag = handler_ran.clone();

    let authed = Procedure::builder().with(require_user());

    let router = RouterBuilder::new()
        .procedure(
            "me",
            authed.clone().read(move |_ctx, _: ()| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok::<_, Error>("you")
                }
            }),
        )
        .procedure(
            "rename",
            // Extending the base produces an independent builder; `authed`
            // itself is reusable and unchanged.
            authed
                .with(tracing_middleware("audit"))
                .write(|_ctx, name: String| async move { Ok::<_, Error>(name) }),
        )
        .build()
        .unwrap()
        .arced();

    let err = expect_error(exec(&router, read_req(1, "me", None)).await.unwrap());
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert!(!handler_ran.load(Ordering::SeqCst), "short-circuit skips the handler");

    let resp = exec_with_ctx(
        &router,
        || Context::new().with_value("user", "alice".to_string()),
        read_req(2, "me", None),
    )
    .await
    .unwrap();
    assert_eq!(expect_data(resp), json!("you"));
    assert!(handler_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn middleware_may_remap_error_codes_but_the_executor_never_does() {
    let remap = Middleware::new(|ctx, next| async move {
        match next.exec(ctx).await {
            Err(err) if err.code() == ErrorCode::PreconditionFailed => Err(Error::new(
                ErrorCode::Conflict,
                "the post was edited concurrently".into(),
            )),
            other => other,
        }
    });
    let passthrough = Middleware::new(|ctx, next| async move { next.exec(ctx).await });

    let failing = |_ctx, _: ()| async move {
        Err::<(), _>(Error::new(ErrorCode::PreconditionFailed, "stale revision".into()))
    };

    let router = RouterBuilder::new()
        .procedure(
            "remapped",
            Procedure::builder().with(remap).with(passthrough.clone()).write(failing),
        )
        .procedure(
            "plain",
            Procedure::builder().with(passthrough).write(failing),
        )
        .build()
        .unwrap()
        .arced();

    let err = expect_error(exec(&router, write_req(1, "remapped", None)).await.unwrap());
    assert_eq!(err.code, ErrorCode::Conflict);

    // Without the remapping layer the original code reaches the wire intact.
    let err = expect_error(exec(&router, write_req(2, "plain", None)).await.unwrap());
    assert_eq!(err.code, ErrorCode::PreconditionFailed);
    assert_eq!(err.data.as_ref().unwrap().http_status, 412);
}

#[tokio::test]
async fn output_validation_failure_is_internal_not_bad_request() {
    let build = |expose: bool| {
        RouterBuilder::new()
            .procedure(
                "broken",
                Procedure::builder()
                    .output(Validator::new(|output| match output.as_i64() {
                        Some(n) if n >= 0 => Ok(output),
                        _ => Err(ValidationIssues::single(
                            "remaining_quota",
                            "must be a non-negative integer",
                        )),
                    }))
                    .read(|_ctx, _: ()| async move { Ok::<_, Error>(-1) }),
            )
            .expose_errors(expose)
            .build()
            .unwrap()
            .arced()
    };

    let err = expect_error(exec(&build(false), read_req(1, "broken", None)).await.unwrap());
    assert_eq!(err.code, ErrorCode::Internal);
    assert_eq!(err.data.as_ref().unwrap().http_status, 500);
    // Validator detail describes our own bug; it is not caller-correctable
    // input feedback, so outside debug mode neither the message nor the
    // data may echo any of it.
    assert_eq!(err.message, "internal server error");
    let data = err.data.unwrap();
    assert!(data.issues.is_none());
    assert!(data.stack.is_none());

    // Debug mode surfaces the same detail through the cause chain instead.
    let err = expect_error(exec(&build(true), read_req(1, "broken", None)).await.unwrap());
    assert_eq!(err.message, "internal server error");
    assert!(err.data.unwrap().stack.unwrap().contains("remaining_quota"));
}

#[tokio::test]
async fn causes_only_leak_in_debug_mode() {
    let build = |expose: bool| {
        RouterBuilder::new()
            .procedure(
                "typed",
                Procedure::builder().read(|_ctx, n: u32| async move { Ok::<_, Error>(n) }),
            )
            .expose_errors(expose)
            .build()
            .unwrap()
            .arced()
    };

    // Type-level rejection of the input carries a serde cause.
    let err = expect_error(
        exec(&build(false), read_req(1, "typed", Some(json!("nope")))).await.unwrap(),
    );
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.data.unwrap().stack.is_none());

    let err = expect_error(
        exec(&build(true), read_req(1, "typed", Some(json!("nope")))).await.unwrap(),
    );
    assert!(err.data.unwrap().stack.is_some());
}

#[tokio::test]
async fn batched_requests_fail_independently() {
    let router = RouterBuilder::new()
        .procedure(
            "echo",
            Procedure::builder().read(|_ctx, input: Value| async move { Ok::<_, Error>(input) }),
        )
        .build()
        .unwrap()
        .arced();

    let mut conn = Connection::new(router, Context::new);

    let immediate = conn.handle(vec![
        read_req(1, "echo", Some(json!("one"))),
        read_req(2, "missing", None),
        read_req(3, "echo", Some(json!("three"))),
    ]);

    // The unresolvable call fails on the spot; the other two are in flight.
    assert_eq!(immediate.len(), 1);
    assert_eq!(immediate[0].id, RequestId::Number(2));

    let mut data = Vec::new();
    for _ in 0..2 {
        let resp = conn.next_response().await.unwrap();
        data.push((resp.id.clone(), expect_data(resp)));
    }
    data.sort_by_key(|(id, _)| format!("{id}"));
    assert_eq!(
        data,
        vec![
            (RequestId::Number(1), json!("one")),
            (RequestId::Number(3), json!("three")),
        ]
    );
}

#[tokio::test]
async fn malformed_frames_produce_no_responses() {
    let router = RouterBuilder::new().build().unwrap().arced();
    let mut conn = Connection::new(router, Context::new);

    assert!(conn.handle_raw(json!({ "kind": "dance", "id": 1 })).is_empty());
    assert!(conn.handle_raw(json!("not an envelope")).is_empty());
}
