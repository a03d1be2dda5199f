//! Middleware layer: the stage traits and the built-in stages.
//!
//! A **stage** is one unit of pipeline logic. There are two capabilities:
//!
//! - [`Stage`] — sees the live [`Request`] on its way in. It can mutate the
//!   request (attachments, usually), pass control on via [`Next`],
//!   short-circuit by returning its own [`Response`], or raise a [`Fault`].
//! - [`ErrorStage`] — consulted only after a fault. It sees the fault and
//!   the request's [`RequestMeta`] snapshot and either responds or
//!   delegates to the next error stage.
//!
//! # Exactly-once advancement
//!
//! [`Next::run`] consumes the continuation. A stage physically cannot
//! advance twice, and a stage that returned a response cannot also have
//! advanced — the chain's return value *is* the response. The one
//! remaining misuse, a stage that never resolves at all, is caught by the
//! pipeline's per-request deadline.
//!
//! # Writing a stage
//!
//! ```rust
//! use strata::middleware::{BoxFuture, Next, Stage};
//! use strata::{Fault, Request, Response};
//!
//! struct RequireAuth;
//!
//! impl Stage for RequireAuth {
//!     fn name(&self) -> &'static str {
//!         "require-auth"
//!     }
//!
//!     fn handle<'a>(
//!         &'a self,
//!         req: Request,
//!         next: Next,
//!     ) -> BoxFuture<'a, Result<Response, Fault>> {
//!         Box::pin(async move {
//!             if req.header("authorization").is_none() {
//!                 return Err(Fault::with_status(401, "missing credentials"));
//!             }
//!             next.run(req).await
//!         })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::fault::Fault;
use crate::handler::BoxedHandler;
use crate::request::{Request, RequestMeta};
use crate::response::Response;

mod parse_json;
mod rate_limit;
mod recover;
mod request_id;

pub use parse_json::{JsonBody, ParseJson};
pub use rate_limit::RateLimit;
pub use recover::Recover;
pub use request_id::{RequestId, RequestTag};

/// A heap-allocated, type-erased future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Stage ─────────────────────────────────────────────────────────────────────

/// One unit of request-path pipeline logic.
///
/// Stages are registered once at startup and shared across all in-flight
/// requests; per-request state belongs in the request's attachment map,
/// never in the stage itself.
pub trait Stage: Send + Sync + 'static {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Observe, mutate, short-circuit, or raise.
    ///
    /// Return `next.run(req).await` to continue the walk, your own
    /// `Ok(response)` to short-circuit every remaining stage, or
    /// `Err(fault)` to abandon the chain and enter the error scope.
    fn handle<'a>(
        &'a self,
        req: Request,
        next: Next,
    ) -> BoxFuture<'a, Result<Response, Fault>>;
}

// ── ErrorStage ────────────────────────────────────────────────────────────────

/// What an error stage decided to do with a fault.
pub enum ErrorFlow {
    /// Answer the request with this response. Later error stages are skipped.
    Respond(Response),
    /// Let the next error stage look at the fault.
    Delegate,
}

/// One unit of error-path pipeline logic.
///
/// Error stages are non-throwing by contract: they exist to *end* failure,
/// not to produce more of it. Returning `Err` from here is itself a
/// programmer fault — the pipeline reports it to the supervisor and
/// answers the request with an opaque 500.
///
/// Error stages are synchronous. Everything they legitimately do — classify,
/// log, build a response — completes without suspending.
pub trait ErrorStage: Send + Sync + 'static {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    fn handle(&self, fault: &Fault, req: &RequestMeta) -> Result<ErrorFlow, Fault>;
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// The one-shot continuation handed to each [`Stage`].
///
/// Holds the remaining stage chain and, at the end, the terminal handler.
/// [`run`](Next::run) consumes it, so control can be passed on at most
/// once; the pipeline itself advances the cursor — stages never reach
/// around it to call each other directly.
pub struct Next {
    inner: NextInner,
}

enum NextInner {
    Stage {
        stage: Arc<dyn Stage>,
        next: Box<Next>,
    },
    Terminal(BoxedHandler),
}

impl Next {
    pub(crate) fn terminal(handler: BoxedHandler) -> Self {
        Self { inner: NextInner::Terminal(handler) }
    }

    pub(crate) fn stage(stage: Arc<dyn Stage>, next: Next) -> Self {
        Self { inner: NextInner::Stage { stage, next: Box::new(next) } }
    }

    /// Passes control to the next stage in the chain, or to the terminal
    /// handler if this stage was the last.
    pub async fn run(self, req: Request) -> Result<Response, Fault> {
        match self.inner {
            NextInner::Stage { stage, next } => stage.handle(req, *next).await,
            NextInner::Terminal(handler) => handler.call(req).await,
        }
    }
}

// ── FnStage ───────────────────────────────────────────────────────────────────

/// A [`Stage`] built from a closure, for stages too small to name a struct.
///
/// ```rust
/// use strata::middleware::FnStage;
///
/// let trace = FnStage::new("trace", |req, next| {
///     Box::pin(async move {
///         tracing::debug!(path = req.path(), "dispatching");
///         next.run(req).await
///     })
/// });
/// ```
pub struct FnStage<F> {
    name: &'static str,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(Request, Next) -> BoxFuture<'static, Result<Response, Fault>>
        + Send
        + Sync
        + 'static,
{
    pub fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Stage for FnStage<F>
where
    F: Fn(Request, Next) -> BoxFuture<'static, Result<Response, Fault>>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle<'a>(
        &'a self,
        req: Request,
        next: Next,
    ) -> BoxFuture<'a, Result<Response, Fault>> {
        (self.func)(req, next)
    }
}
