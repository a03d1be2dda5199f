//! # strata
//!
//! The dispatch-and-fault-handling kernel a minimal HTTP service needs.
//! Nothing more. Nothing less.
//!
//! ## The contract
//!
//! strata is not a web framework. There is no templating, no sessions, no
//! routing language beyond method + path. What it does own is the part of
//! a service that is actually hard to get right once requests are failing
//! concurrently:
//!
//! - **An ordered middleware pipeline** — application, route, and error
//!   scopes; registration order is execution order; short-circuiting and
//!   fault propagation with exactly one response per request, by
//!   construction.
//! - **A fixed-window rate limiter** — a counting admission gate keyed by
//!   client identity.
//! - **A structured access logger** — one JSON record per exchange,
//!   durable through a flushable [`Sink`].
//! - **A fault taxonomy and supervisor** — Operational faults become safe
//!   status codes; Programmer faults become opaque 500s and, once they
//!   escape a request entirely, a deliberate non-zero exit.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use strata::middleware::{RateLimit, Recover, RequestId};
//! use strata::{
//!     AccessLog, Method, Pipeline, RateLimiter, Request, Response, Server, Supervisor,
//!     TracingSink,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = Arc::new(TracingSink);
//!     let supervisor = Arc::new(Supervisor::new(sink.clone()));
//!     let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(60)));
//!
//!     let app = Pipeline::new()
//!         .with(RequestId)
//!         .with(RateLimit::new(limiter))
//!         .route(Method::Get, "/users/{id}", get_user)
//!         .on_error(Recover::new(supervisor.clone()))
//!         .access_log(AccessLog::new(sink))
//!         .supervised(supervisor.clone());
//!
//!     Server::bind("0.0.0.0:3000")
//!         .serve(app, supervisor)
//!         .await
//!         .unwrap();
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//! }
//! ```

mod access_log;
mod config;
mod error;
mod fault;
mod handler;
mod limiter;
mod method;
mod pipeline;
mod request;
mod response;
mod server;
mod status;
mod supervisor;

pub mod health;
pub mod middleware;

pub use access_log::{AccessLog, AccessRecord, FileSink, MemorySink, Sink, TracingSink};
pub use config::{Config, RouteLimit};
pub use error::Error;
pub use fault::{classify, Classification, Fault, FaultKind, Severity};
pub use handler::Handler;
pub use limiter::{Admission, RateLimiter};
pub use method::Method;
pub use pipeline::Pipeline;
pub use request::{Request, RequestMeta};
pub use response::{ContentType, IntoOutcome, IntoResponse, Response, ResponseBuilder};
pub use server::Server;
pub use status::Status;
pub use supervisor::{Supervisor, Verdict};
