//! End-to-end pipeline behavior: dispatch, recovery, admission control,
//! and the access log, wired together the way a real service wires them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use strata::middleware::{JsonBody, ParseJson, RateLimit, Recover, RequestId, RequestTag};
use strata::{
    AccessLog, AccessRecord, Fault, MemorySink, Method, Pipeline, RateLimiter, Request, Response,
    Status, Supervisor,
};

struct World {
    pipeline: Pipeline,
    sink: Arc<MemorySink>,
    supervisor: Arc<Supervisor>,
}

/// A pipeline with the standard wiring: recovery, access log, supervisor.
fn world(build: impl FnOnce(Pipeline) -> Pipeline) -> World {
    let sink = Arc::new(MemorySink::new());
    let supervisor = Arc::new(Supervisor::new(sink.clone()));
    let pipeline = build(
        Pipeline::new()
            .supervised(supervisor.clone())
            .access_log(AccessLog::new(sink.clone())),
    )
    .on_error(Recover::new(supervisor.clone()));
    World { pipeline, sink, supervisor }
}

async fn hello(_req: Request) -> Response {
    Response::text("Hello, World!")
}

#[tokio::test]
async fn unregistered_path_hits_the_fallback_once_and_logs_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FIRED: AtomicUsize = AtomicUsize::new(0);
    let w = world(|p| {
        p.route(Method::Get, "/", hello)
            .fallback(|_req: Request| async {
                FIRED.fetch_add(1, Ordering::SeqCst);
                Response::status(Status::NotFound)
            })
    });

    let response = w.pipeline.dispatch(Request::new(Method::Get, "/nowhere")).await;

    assert_eq!(response.status_code(), 404);
    assert_eq!(FIRED.load(Ordering::SeqCst), 1);
    let records = w.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, 404);
    assert_eq!(records[0].path, "/nowhere");
    assert_eq!(w.supervisor.reported(), 0);
}

#[tokio::test]
async fn upstream_fault_becomes_502_and_the_process_keeps_serving() {
    let w = world(|p| {
        p.route(Method::Get, "/", hello)
            .route(Method::Get, "/flaky", |_req: Request| async {
                Err::<Response, _>(Fault::upstream("payments: connection refused"))
            })
    });

    let response = w.pipeline.dispatch(Request::new(Method::Get, "/flaky")).await;
    assert_eq!(response.status_code(), 502);
    let body = String::from_utf8(response.body().to_vec()).unwrap();
    assert!(!body.contains("payments"), "internal detail leaked: {body}");

    // Operational faults never involve the supervisor.
    assert_eq!(w.supervisor.reported(), 0);

    // And the next request is business as usual.
    let response = w.pipeline.dispatch(Request::new(Method::Get, "/")).await;
    assert_eq!(response.status_code(), 200);

    let statuses: Vec<u16> = w.sink.records().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![502, 200]);
}

#[tokio::test]
async fn programmer_fault_is_contained_reported_and_opaque() {
    let w = world(|p| {
        p.route(Method::Get, "/", hello)
            .route(Method::Get, "/buggy", |_req: Request| async {
                Err::<Response, _>(Fault::internal("slice index out of range"))
            })
    });

    let response = w.pipeline.dispatch(Request::new(Method::Get, "/buggy")).await;
    assert_eq!(response.status_code(), 500);
    let body = String::from_utf8(response.body().to_vec()).unwrap();
    assert!(!body.contains("slice index"));

    assert_eq!(w.supervisor.reported(), 1);

    // Contained by the error scope, so serving continues.
    let response = w.pipeline.dispatch(Request::new(Method::Get, "/")).await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn rate_limit_admits_the_window_then_answers_429() {
    let limiter = Arc::new(RateLimiter::new(2, Duration::from_millis(900_000)));
    let w = world(|p| {
        p.with(RateLimit::new(limiter.clone()))
            .route(Method::Get, "/", hello)
    });

    async fn call(pipeline: &Pipeline, client: &str) -> Response {
        pipeline
            .dispatch(Request::new(Method::Get, "/").with_client(client))
            .await
    }

    assert_eq!(call(&w.pipeline, "10.0.0.1").await.status_code(), 200);
    assert_eq!(call(&w.pipeline, "10.0.0.1").await.status_code(), 200);

    let third = call(&w.pipeline, "10.0.0.1").await;
    assert_eq!(third.status_code(), 429);
    assert!(third.header("retry-after").is_some());

    // Another client draws on its own window.
    assert_eq!(call(&w.pipeline, "10.0.0.2").await.status_code(), 200);

    let statuses: Vec<u16> = w.sink.records().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![200, 200, 429, 200]);
    assert_eq!(w.supervisor.reported(), 0);
}

#[tokio::test]
async fn blown_deadline_answers_504_through_the_error_scope() {
    let w = world(|p| {
        p.route(Method::Get, "/stuck", |_req: Request| async {
            std::future::pending::<Response>().await
        })
    });

    let req = Request::new(Method::Get, "/stuck")
        .with_deadline(Instant::now() + Duration::from_millis(20));
    let response = w.pipeline.dispatch(req).await;

    assert_eq!(response.status_code(), 504);
    let records = w.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, 504);
}

#[tokio::test]
async fn abandoned_request_is_logged_with_the_sentinel() {
    let w = world(|p| {
        p.route(Method::Get, "/slow", |_req: Request| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Response::text("late")
        })
    });

    // The transport drops the dispatch future: client went away.
    let dropped = tokio::time::timeout(
        Duration::from_millis(20),
        w.pipeline.dispatch(Request::new(Method::Get, "/slow")),
    )
    .await;
    assert!(dropped.is_err());

    let records = w.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AccessRecord::ABORTED);
    assert_eq!(records[0].bytes, 0);
}

#[tokio::test]
async fn request_id_flows_from_header_to_handler() {
    let w = world(|p| {
        p.with(RequestId)
            .route(Method::Get, "/whoami", |req: Request| async move {
                let tag = req
                    .attachment::<RequestTag>()
                    .map(|t| t.0.clone())
                    .unwrap_or_default();
                Response::text(tag)
            })
    });

    // Client-supplied id is kept.
    let response = w
        .pipeline
        .dispatch(
            Request::new(Method::Get, "/whoami").with_header("x-request-id", "trace-abc-1"),
        )
        .await;
    assert_eq!(response.body(), b"trace-abc-1");

    // Absent one, an id is minted.
    let response = w.pipeline.dispatch(Request::new(Method::Get, "/whoami")).await;
    assert!(!response.body().is_empty());
}

#[tokio::test]
async fn parsed_json_body_reaches_the_handler() {
    let w = world(|p| {
        p.with(ParseJson)
            .route(Method::Post, "/users", |req: Request| async move {
                let Some(JsonBody(body)) = req.attachment::<JsonBody>() else {
                    return Response::status(Status::BadRequest);
                };
                let name = body["name"].as_str().unwrap_or("unknown");
                Response::builder()
                    .status(Status::Created)
                    .json(format!(r#"{{"name":"{name}"}}"#).into_bytes())
            })
    });

    let response = w
        .pipeline
        .dispatch(
            Request::new(Method::Post, "/users")
                .with_header("content-type", "application/json")
                .with_body(&br#"{"name":"alice"}"#[..]),
        )
        .await;
    assert_eq!(response.status_code(), 201);
    assert_eq!(response.body(), br#"{"name":"alice"}"#);
}

#[tokio::test]
async fn malformed_json_is_a_validation_fault_not_a_crash() {
    let w = world(|p| {
        p.with(ParseJson)
            .route(Method::Post, "/users", |_req: Request| async {
                Response::status(Status::Created)
            })
    });

    let response = w
        .pipeline
        .dispatch(
            Request::new(Method::Post, "/users")
                .with_header("content-type", "application/json")
                .with_body(&b"{not json"[..]),
        )
        .await;

    assert_eq!(response.status_code(), 400);
    assert_eq!(w.supervisor.reported(), 0);
    assert_eq!(w.sink.records()[0].status, 400);
}

#[tokio::test]
async fn the_full_stack_composes() {
    // The whole kernel at once: tagging, parsing, admission, scoped
    // stages, recovery, logging — one request through all of it.
    let limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(60)));
    let w = world(|p| {
        p.with(RequestId)
            .with(ParseJson)
            .with(RateLimit::new(limiter.clone()))
            .route(Method::Get, "/user", |req: Request| async move {
                assert!(req.attachment::<RequestTag>().is_some());
                Response::text("User Profile")
            })
    });

    let response = w
        .pipeline
        .dispatch(
            Request::new(Method::Get, "/user")
                .with_client("10.9.9.9")
                .with_header("user-agent", "e2e/1.0"),
        )
        .await;

    assert_eq!(response.status_code(), 200);
    let records = w.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method, "GET");
    assert_eq!(records[0].client, "10.9.9.9");
    assert_eq!(records[0].agent.as_deref(), Some("e2e/1.0"));
    assert_eq!(records[0].bytes, "User Profile".len() as u64);
}
