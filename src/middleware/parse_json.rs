//! JSON body-parsing stage.

use crate::fault::Fault;
use crate::middleware::{BoxFuture, Next, Stage};
use crate::request::Request;
use crate::response::Response;

/// The attachment written by [`ParseJson`]: the request body as a parsed
/// JSON value.
#[derive(Clone, Debug, PartialEq)]
pub struct JsonBody(pub serde_json::Value);

/// Parses a JSON request body into the attachment map.
///
/// Only bodies whose `content-type` claims JSON are touched; everything
/// else passes through untouched, body bytes intact. A body that claims
/// JSON but isn't raises a Validation fault — the client said JSON, the
/// client gets a 400.
pub struct ParseJson;

impl Stage for ParseJson {
    fn name(&self) -> &'static str {
        "parse-json"
    }

    fn handle<'a>(
        &'a self,
        mut req: Request,
        next: Next,
    ) -> BoxFuture<'a, Result<Response, Fault>> {
        Box::pin(async move {
            let claims_json = req
                .header("content-type")
                .is_some_and(|ct| ct.starts_with("application/json"));

            if claims_json && !req.body().is_empty() {
                match serde_json::from_slice(req.body()) {
                    Ok(value) => req.attach(JsonBody(value)),
                    Err(e) => return Err(Fault::validation(format!("malformed json body: {e}"))),
                }
            }
            next.run(req).await
        })
    }
}
