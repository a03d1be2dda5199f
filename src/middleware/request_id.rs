//! Request-id stage.

use uuid::Uuid;

use crate::fault::Fault;
use crate::middleware::{BoxFuture, Next, Stage};
use crate::request::Request;
use crate::response::Response;

/// The attachment written by [`RequestId`]. Later stages and terminal
/// handlers read it back with `req.attachment::<RequestTag>()`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestTag(pub String);

/// Tags every request with an id: the client's `x-request-id` header when
/// present (so upstream traces keep their thread), a fresh UUID otherwise.
///
/// Register early — every stage after this one can correlate its logs.
pub struct RequestId;

impl Stage for RequestId {
    fn name(&self) -> &'static str {
        "request-id"
    }

    fn handle<'a>(
        &'a self,
        mut req: Request,
        next: Next,
    ) -> BoxFuture<'a, Result<Response, Fault>> {
        Box::pin(async move {
            let id = match req.header("x-request-id") {
                Some(id) if !id.is_empty() => id.to_owned(),
                _ => Uuid::new_v4().to_string(),
            };
            req.attach(RequestTag(id));
            next.run(req).await
        })
    }
}
