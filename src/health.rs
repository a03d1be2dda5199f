//! Built-in health-probe terminal handlers.
//!
//! Orchestrators ask two questions; register the answers:
//!
//! ```rust,no_run
//! use strata::{health, Method, Pipeline};
//!
//! let app = Pipeline::new()
//!     .route(Method::Get, "/healthz", health::liveness)
//!     .route(Method::Get, "/readyz", health::readiness);
//! ```
//!
//! `/healthz` failing means restart the process; `/readyz` failing means
//! pull it from the load balancer. Replace `readiness` with your own
//! handler to gate on dependency availability (a database, a downstream
//! service) or a warm-up period.

use crate::{Request, Response};

/// Liveness probe handler.
///
/// Always `200 OK`, body `"ok"`. If the process can answer HTTP at all it
/// is alive — this handler intentionally has no dependencies.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

/// Readiness probe handler (default implementation).
///
/// Always `200 OK`, body `"ready"`. Swap in your own once readiness
/// actually depends on something.
pub async fn readiness(_req: Request) -> Response {
    Response::text("ready")
}
