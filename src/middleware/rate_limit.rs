//! Rate-limiting stage.

use std::sync::Arc;

use crate::fault::Fault;
use crate::limiter::{Admission, RateLimiter};
use crate::middleware::{BoxFuture, Next, Stage};
use crate::request::Request;
use crate::response::Response;

/// Admission control at the pipeline's front door.
///
/// Keys the shared [`RateLimiter`] by the request's client identity and
/// raises [`Fault::RateLimited`] on rejection — the wrapped chain is never
/// entered, and the centralized error stage turns the fault into the
/// client-visible 429 with its `retry-after`.
///
/// The limiter is `Arc`-shared so several scopes can draw on one budget,
/// or each scope can carry its own.
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Stage for RateLimit {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn handle<'a>(
        &'a self,
        req: Request,
        next: Next,
    ) -> BoxFuture<'a, Result<Response, Fault>> {
        Box::pin(async move {
            match self.limiter.admit(req.client()) {
                Admission::Allowed { .. } => next.run(req).await,
                Admission::Rejected { retry_after } => Err(Fault::RateLimited { retry_after }),
            }
        })
    }
}
