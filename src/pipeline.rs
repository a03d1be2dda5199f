//! The middleware dispatch engine.
//!
//! A [`Pipeline`] owns three ordered stage lists and a route table:
//!
//! - **application scope** — stages every request walks, in registration
//!   order;
//! - **route scopes** — stages bound to a path prefix; every scope whose
//!   prefix matches the request runs, in registration order, after the
//!   application scope;
//! - **error scope** — [`ErrorStage`]s consulted, from the start of the
//!   list, when any stage or terminal handler raises a [`Fault`];
//! - **routes** — terminal handlers keyed by method + path (radix tree per
//!   method), with a designated fallback that answers 404 when nothing
//!   matches.
//!
//! [`dispatch`](Pipeline::dispatch) flattens the scopes that apply to one
//! request into a single chain and advances it itself, one cursor, one
//! direction. A stage short-circuits by returning a response: everything
//! after it — including scoped stages already entered — never runs.
//!
//! The whole dispatch runs under a per-request deadline. A stage that
//! neither advances nor responds is a bug this design cannot prevent
//! structurally; the deadline converts it into a Timeout fault through the
//! error scope instead of a permanently pending request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use matchit::Router as PathTree;
use tracing::error;

use crate::access_log::AccessLog;
use crate::fault::Fault;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::middleware::{ErrorFlow, ErrorStage, Next, Stage};
use crate::request::{Request, RequestMeta};
use crate::response::Response;
use crate::status::Status;
use crate::supervisor::Supervisor;

/// Applied when neither the transport nor the request set a deadline.
const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// The designated 404 stage, pre-registered so an empty pipeline still
/// answers every request.
async fn not_found(_req: Request) -> Response {
    Response::builder()
        .status(Status::NotFound)
        .json(br#"{"error":"not found"}"#.to_vec())
}

fn opaque_500() -> Response {
    Response::builder()
        .status(Status::InternalServerError)
        .json(br#"{"error":"internal error"}"#.to_vec())
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// The dispatch engine. Build it once at startup; registration order is
/// execution order.
pub struct Pipeline {
    app: Vec<Arc<dyn Stage>>,
    scopes: Vec<(String, Vec<Arc<dyn Stage>>)>,
    errors: Vec<Arc<dyn ErrorStage>>,
    routes: HashMap<Method, PathTree<BoxedHandler>>,
    fallback: BoxedHandler,
    access: Option<AccessLog>,
    supervisor: Option<Arc<Supervisor>>,
    default_deadline: Duration,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            app: Vec::new(),
            scopes: Vec::new(),
            errors: Vec::new(),
            routes: HashMap::new(),
            fallback: not_found.into_boxed_handler(),
            access: None,
            supervisor: None,
            default_deadline: DEFAULT_DEADLINE,
        }
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Appends a stage to the application scope.
    pub fn with(mut self, stage: impl Stage) -> Self {
        self.app.push(Arc::new(stage));
        self
    }

    /// Appends a stage to the route scope for `prefix`, creating the scope
    /// on first use.
    ///
    /// A scope's position among scopes is fixed by its first registration;
    /// stages within it keep their own registration order.
    pub fn with_scoped(mut self, prefix: &str, stage: impl Stage) -> Self {
        let stage: Arc<dyn Stage> = Arc::new(stage);
        match self.scopes.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, stages)) => stages.push(stage),
            None => self.scopes.push((prefix.to_owned(), vec![stage])),
        }
        self
    }

    /// Appends an error stage to the error scope.
    pub fn on_error(mut self, stage: impl ErrorStage) -> Self {
        self.errors.push(Arc::new(stage));
        self
    }

    /// Registers a terminal handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax — `req.param("name")` retrieves
    /// them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route pattern. Routes are registered
    /// at startup; a malformed one is a deployment error, not a runtime
    /// condition.
    pub fn route(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Replaces the designated fallback handler (the 404 stage).
    pub fn fallback(mut self, handler: impl Handler) -> Self {
        self.fallback = handler.into_boxed_handler();
        self
    }

    /// Installs the access logger. Without one, nothing is recorded.
    pub fn access_log(mut self, log: AccessLog) -> Self {
        self.access = Some(log);
        self
    }

    /// Wires the supervisor so misbehaving error stages can be reported.
    pub fn supervised(mut self, supervisor: Arc<Supervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Overrides the default per-request deadline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Threads one request through the stage chain and returns its one
    /// response.
    ///
    /// Every path out of here produces exactly one response and at most
    /// one access record: the happy path, the error scope, the synthesized
    /// timeout, and — via a drop guard — abandonment, when the transport
    /// drops this future because the client went away.
    pub async fn dispatch(&self, req: Request) -> Response {
        let meta = req.meta().clone();
        let deadline = meta
            .deadline
            .unwrap_or(meta.received_at + self.default_deadline);

        let mut guard = AbandonGuard { access: self.access.clone(), meta: meta.clone() };

        let outcome = match tokio::time::timeout_at(deadline.into(), self.run_chain(req)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Fault::Timeout),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(fault) => self.recover(&fault, &meta),
        };

        guard.access = None; // a response exists; this is no abandonment
        if let Some(access) = &self.access {
            access.on_complete(
                &meta,
                response.status_code(),
                response.body().len() as u64,
                meta.received_at.elapsed(),
            );
        }
        response
    }

    /// Flattens the scopes that apply to this request and walks the chain.
    async fn run_chain(&self, mut req: Request) -> Result<Response, Fault> {
        let terminal = match self.lookup(req.method(), req.path()) {
            Some((handler, params)) => {
                req.set_params(params);
                handler
            }
            None => Arc::clone(&self.fallback),
        };

        // Built back to front so the first-registered stage is outermost:
        // app stages, then every matching route scope, then the terminal.
        let path = req.path().to_owned();
        let mut next = Next::terminal(terminal);
        for (prefix, stages) in self.scopes.iter().rev() {
            if scope_matches(prefix, &path) {
                for stage in stages.iter().rev() {
                    next = Next::stage(Arc::clone(stage), next);
                }
            }
        }
        for stage in self.app.iter().rev() {
            next = Next::stage(Arc::clone(stage), next);
        }

        next.run(req).await
    }

    fn lookup(
        &self,
        method: Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    /// Walks the error scope from its start. The first stage to respond
    /// wins; if all delegate, a default 500 is synthesized.
    fn recover(&self, fault: &Fault, meta: &RequestMeta) -> Response {
        for stage in &self.errors {
            match stage.handle(fault, meta) {
                Ok(ErrorFlow::Respond(response)) => return response,
                Ok(ErrorFlow::Delegate) => {}
                Err(misuse) => {
                    // Error stages are non-throwing by contract; this one
                    // is a bug in its own right.
                    error!(stage = stage.name(), fault = %misuse, "error stage raised a fault");
                    if let Some(supervisor) = &self.supervisor {
                        supervisor.report(&misuse);
                    }
                    return opaque_500();
                }
            }
        }
        opaque_500()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix matching on path-segment boundaries: `/user` covers `/user` and
/// `/user/42`, never `/username`.
fn scope_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

// ── AbandonGuard ──────────────────────────────────────────────────────────────

/// Records the aborted-request access entry if the dispatch future is
/// dropped before a response exists. `dispatch` clears `access` once the
/// response is final, which disarms the guard.
struct AbandonGuard {
    access: Option<AccessLog>,
    meta: RequestMeta,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(access) = &self.access {
            access.on_abandoned(&self.meta, self.meta.received_at.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::BoxFuture;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Records its name on entry, then advances.
    struct Tracker {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Stage for Tracker {
        fn name(&self) -> &'static str {
            self.name
        }

        fn handle<'a>(
            &'a self,
            req: Request,
            next: Next,
        ) -> BoxFuture<'a, Result<Response, Fault>> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(self.name);
                next.run(req).await
            })
        }
    }

    /// Responds without advancing.
    struct Gate {
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Stage for Gate {
        fn name(&self) -> &'static str {
            "gate"
        }

        fn handle<'a>(
            &'a self,
            _req: Request,
            _next: Next,
        ) -> BoxFuture<'a, Result<Response, Fault>> {
            Box::pin(async move {
                self.seen.lock().unwrap().push("gate");
                Ok(Response::status(Status::Forbidden))
            })
        }
    }

    fn tracker(name: &'static str, seen: &Arc<Mutex<Vec<&'static str>>>) -> Tracker {
        Tracker { name, seen: Arc::clone(seen) }
    }

    async fn ok_handler(_req: Request) -> Response {
        Response::text("ok")
    }

    #[tokio::test]
    async fn stages_run_in_registration_order_across_scopes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with(tracker("app-1", &seen))
            .with(tracker("app-2", &seen))
            .with_scoped("/user", tracker("user-1", &seen))
            .with_scoped("/user", tracker("user-2", &seen))
            .route(Method::Get, "/user/profile", ok_handler);

        let response = pipeline
            .dispatch(Request::new(Method::Get, "/user/profile"))
            .await;

        assert_eq!(response.status_code(), 200);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["app-1", "app-2", "user-1", "user-2"]
        );
    }

    #[test]
    fn scope_matching_respects_segment_boundaries() {
        assert!(scope_matches("/", "/anything"));
        assert!(scope_matches("/user", "/user"));
        assert!(scope_matches("/user", "/user/42"));
        assert!(!scope_matches("/user", "/username"));
        assert!(!scope_matches("/user", "/"));
    }

    #[tokio::test]
    async fn non_matching_scope_is_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with(tracker("app", &seen))
            .with_scoped("/admin", tracker("admin", &seen))
            .route(Method::Get, "/", ok_handler);

        pipeline.dispatch(Request::new(Method::Get, "/")).await;

        assert_eq!(*seen.lock().unwrap(), vec!["app"]);
    }

    #[tokio::test]
    async fn short_circuit_stops_everything_downstream() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with(tracker("before", &seen))
            .with(Gate { seen: Arc::clone(&seen) })
            .with(tracker("after", &seen))
            .with_scoped("/", tracker("scoped", &seen))
            .route(Method::Get, "/", ok_handler);

        let response = pipeline.dispatch(Request::new(Method::Get, "/")).await;

        assert_eq!(response.status_code(), 403);
        assert_eq!(*seen.lock().unwrap(), vec!["before", "gate"]);
    }

    #[tokio::test]
    async fn unmatched_path_falls_back_to_404() {
        let pipeline = Pipeline::new().route(Method::Get, "/", ok_handler);

        let response = pipeline
            .dispatch(Request::new(Method::Get, "/nowhere"))
            .await;
        assert_eq!(response.status_code(), 404);

        // Same path, wrong method: also the fallback's business.
        let response = pipeline.dispatch(Request::new(Method::Post, "/")).await;
        assert_eq!(response.status_code(), 404);
    }

    #[tokio::test]
    async fn custom_fallback_replaces_the_default() {
        let pipeline = Pipeline::new().fallback(|_req: Request| async {
            Response::builder().status(Status::NotFound).text("gone")
        });

        let response = pipeline.dispatch(Request::new(Method::Get, "/x")).await;
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.body(), b"gone");
    }

    #[tokio::test]
    async fn route_params_reach_the_handler() {
        let pipeline = Pipeline::new().route(Method::Get, "/users/{id}", |req: Request| async move {
            Response::text(req.param("id").unwrap_or("none").to_owned())
        });

        let response = pipeline
            .dispatch(Request::new(Method::Get, "/users/42"))
            .await;
        assert_eq!(response.body(), b"42");
    }

    #[tokio::test]
    async fn raised_fault_with_empty_error_scope_is_a_default_500() {
        let pipeline = Pipeline::new().route(Method::Get, "/", |_req: Request| async {
            Err::<Response, _>(Fault::upstream("payments down"))
        });

        let response = pipeline.dispatch(Request::new(Method::Get, "/")).await;
        assert_eq!(response.status_code(), 500);
    }

    #[tokio::test]
    async fn error_scope_first_responder_wins() {
        struct Delegator;
        impl ErrorStage for Delegator {
            fn name(&self) -> &'static str {
                "delegator"
            }
            fn handle(&self, _: &Fault, _: &RequestMeta) -> Result<ErrorFlow, Fault> {
                Ok(ErrorFlow::Delegate)
            }
        }

        struct Responder(u16);
        impl ErrorStage for Responder {
            fn name(&self) -> &'static str {
                "responder"
            }
            fn handle(&self, _: &Fault, _: &RequestMeta) -> Result<ErrorFlow, Fault> {
                Ok(ErrorFlow::Respond(
                    Response::builder().status_code(self.0).no_body(),
                ))
            }
        }

        let pipeline = Pipeline::new()
            .on_error(Delegator)
            .on_error(Responder(502))
            .on_error(Responder(599)) // never consulted
            .route(Method::Get, "/", |_req: Request| async {
                Err::<Response, _>(Fault::upstream("down"))
            });

        let response = pipeline.dispatch(Request::new(Method::Get, "/")).await;
        assert_eq!(response.status_code(), 502);
    }

    #[tokio::test]
    async fn misbehaving_error_stage_is_reported_and_answered_500() {
        struct Thrower;
        impl ErrorStage for Thrower {
            fn name(&self) -> &'static str {
                "thrower"
            }
            fn handle(&self, _: &Fault, _: &RequestMeta) -> Result<ErrorFlow, Fault> {
                Err(Fault::internal("error stage bug"))
            }
        }

        let supervisor = Arc::new(Supervisor::new(Arc::new(
            crate::access_log::MemorySink::new(),
        )));
        let pipeline = Pipeline::new()
            .supervised(Arc::clone(&supervisor))
            .on_error(Thrower)
            .route(Method::Get, "/", |_req: Request| async {
                Err::<Response, _>(Fault::not_found("thing"))
            });

        let response = pipeline.dispatch(Request::new(Method::Get, "/")).await;
        assert_eq!(response.status_code(), 500);
        assert_eq!(supervisor.reported(), 1);
    }

    #[tokio::test]
    async fn blown_deadline_becomes_a_timeout_fault() {
        struct Verify;
        impl ErrorStage for Verify {
            fn name(&self) -> &'static str {
                "verify"
            }
            fn handle(&self, fault: &Fault, _: &RequestMeta) -> Result<ErrorFlow, Fault> {
                assert!(matches!(fault, Fault::Timeout));
                Ok(ErrorFlow::Respond(
                    Response::builder().status(Status::GatewayTimeout).no_body(),
                ))
            }
        }

        // A stage that "forgot to advance": it never resolves.
        let pipeline = Pipeline::new()
            .on_error(Verify)
            .route(Method::Get, "/", |_req: Request| async {
                std::future::pending::<Response>().await
            });

        let req = Request::new(Method::Get, "/")
            .with_deadline(Instant::now() + Duration::from_millis(20));
        let response = pipeline.dispatch(req).await;
        assert_eq!(response.status_code(), 504);
    }
}
