//! The classic middleware topology, end to end.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Optionally drop a `strata.toml` next to the binary:
//!
//!   listen_addr = "0.0.0.0:3000"
//!   deadline_ms = 30000
//!
//!   [[limits]]
//!   prefix = "/"
//!   limit = 5
//!   window_ms = 60000
//!
//! Try:
//!   curl http://localhost:3000/
//!   curl http://localhost:3000/user
//!   curl http://localhost:3000/about
//!   curl http://localhost:3000/nowhere     ← 404 from the fallback stage
//!   for i in $(seq 1 8); do curl -s -o /dev/null -w '%{http_code}\n' localhost:3000/; done
//!
//! Every exchange lands as a JSON line in ./access.log.

use std::sync::Arc;

use strata::middleware::{FnStage, ParseJson, RateLimit, Recover, RequestId};
use strata::{
    health, AccessLog, Config, FileSink, Method, Pipeline, RateLimiter, Request, Response,
    Server, Sink, Supervisor,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match Config::from_file("strata.toml") {
        Ok(config) => config,
        Err(_) => {
            let mut config = Config::default();
            config.limits.push(strata::RouteLimit {
                prefix: "/".to_owned(),
                limit: 5,
                window_ms: 60_000,
            });
            config
        }
    };

    let sink: Arc<dyn Sink> = Arc::new(
        FileSink::create("access.log")
            .await
            .expect("cannot open access.log"),
    );
    let supervisor = Arc::new(Supervisor::new(sink.clone()));

    let mut app = Pipeline::new()
        .deadline(config.deadline())
        // Application scope: every request walks these, in this order.
        .with(RequestId)
        .with(ParseJson)
        .with(FnStage::new("announce", |req, next| {
            Box::pin(async move {
                tracing::info!(path = req.path(), "application-level stage");
                next.run(req).await
            })
        }));

    // One admission gate per configured route group.
    for limit in &config.limits {
        let limiter = Arc::new(RateLimiter::new(limit.limit, limit.window()));
        app = app.with_scoped(&limit.prefix, RateLimit::new(limiter));
    }

    let app = app
        // Route scope: only /user traffic walks this one.
        .with_scoped(
            "/user",
            FnStage::new("user-scope", |req, next| {
                Box::pin(async move {
                    tracing::info!("user-scoped stage");
                    next.run(req).await
                })
            }),
        )
        .route(Method::Get, "/", hello)
        .route(Method::Get, "/user", user_profile)
        .route(Method::Get, "/about", about)
        .route(Method::Get, "/healthz", health::liveness)
        .route(Method::Get, "/readyz", health::readiness)
        // Error scope: classification, safe responses, supervisor reports.
        .on_error(Recover::new(supervisor.clone()))
        .access_log(AccessLog::new(sink))
        .supervised(supervisor.clone());

    Server::bind(&config.listen_addr)
        .serve(app, supervisor)
        .await
        .expect("server error");
}

async fn hello(_req: Request) -> Response {
    Response::text("Hello, World!")
}

async fn user_profile(_req: Request) -> Response {
    Response::text("User Profile")
}

async fn about(_req: Request) -> Response {
    Response::text("About Page - Hello, World!")
}
