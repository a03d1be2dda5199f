//! The centralized error stage.

use std::sync::Arc;

use tracing::{error, warn};

use crate::fault::{classify, Fault, FaultKind};
use crate::middleware::{ErrorFlow, ErrorStage};
use crate::request::RequestMeta;
use crate::response::Response;
use crate::supervisor::Supervisor;

/// Turns classified faults into client-safe responses.
///
/// Register this last in the error scope — or alone; it answers every
/// fault. Operational faults get their mapped status and a fixed generic
/// body. Programmer faults get an opaque 500 and are reported to the
/// [`Supervisor`]. What was actually wrong goes to the diagnostic log,
/// never to the client.
pub struct Recover {
    supervisor: Arc<Supervisor>,
}

impl Recover {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

/// Status → the one line the client is allowed to see.
fn generic_message(status: u16) -> &'static str {
    match status {
        400 => "invalid request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not found",
        429 => "too many requests",
        502 => "upstream unavailable",
        503 => "service unavailable",
        504 => "deadline exceeded",
        _ => "request failed",
    }
}

impl ErrorStage for Recover {
    fn name(&self) -> &'static str {
        "recover"
    }

    fn handle(&self, fault: &Fault, req: &RequestMeta) -> Result<ErrorFlow, Fault> {
        let class = classify(fault);

        match class.kind {
            FaultKind::Operational => {
                warn!(
                    method = %req.method,
                    path = %req.path,
                    client = %req.client,
                    status = class.status,
                    fault = %fault,
                    "operational fault"
                );
            }
            FaultKind::Programmer => {
                error!(
                    method = %req.method,
                    path = %req.path,
                    client = %req.client,
                    fault = %fault,
                    "programmer fault"
                );
                self.supervisor.report(fault);
            }
        }

        let status = match class.kind {
            FaultKind::Operational => class.status,
            // Whatever a programmer fault claims, the client sees 500.
            FaultKind::Programmer => 500,
        };

        let mut builder = Response::builder().status_code(status);
        if let Fault::RateLimited { retry_after } = fault {
            builder = builder.header("retry-after", &retry_after.as_secs().max(1).to_string());
        }
        let body = format!(r#"{{"error":"{}"}}"#, generic_message(status)).into_bytes();
        Ok(ErrorFlow::Respond(builder.json(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_log::MemorySink;
    use crate::method::Method;
    use crate::request::Request;
    use std::time::Duration;

    fn recover() -> (Recover, Arc<Supervisor>) {
        let supervisor = Arc::new(Supervisor::new(Arc::new(MemorySink::new())));
        (Recover::new(Arc::clone(&supervisor)), supervisor)
    }

    fn meta() -> RequestMeta {
        Request::new(Method::Get, "/x").meta().clone()
    }

    fn respond(stage: &Recover, fault: &Fault) -> Response {
        match stage.handle(fault, &meta()) {
            Ok(ErrorFlow::Respond(response)) => response,
            _ => panic!("recover always responds"),
        }
    }

    #[test]
    fn operational_fault_gets_its_mapped_status() {
        let (stage, supervisor) = recover();
        let response = respond(&stage, &Fault::upstream("payments: connect refused"));
        assert_eq!(response.status_code(), 502);
        assert_eq!(supervisor.reported(), 0);
    }

    #[test]
    fn internal_detail_never_reaches_the_body() {
        let (stage, _) = recover();
        let response = respond(&stage, &Fault::upstream("secret-host:5432 down"));
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(!body.contains("secret-host"));
        assert_eq!(body, r#"{"error":"upstream unavailable"}"#);
    }

    #[test]
    fn programmer_fault_is_opaque_500_and_reported() {
        let (stage, supervisor) = recover();
        let response = respond(&stage, &Fault::internal("slice index 9 out of range"));
        assert_eq!(response.status_code(), 500);
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(!body.contains("slice index"));
        assert_eq!(supervisor.reported(), 1);
    }

    #[test]
    fn rate_limited_fault_carries_retry_after() {
        let (stage, _) = recover();
        let fault = Fault::RateLimited { retry_after: Duration::from_secs(42) };
        let response = respond(&stage, &fault);
        assert_eq!(response.status_code(), 429);
        assert_eq!(response.header("retry-after"), Some("42"));
    }
}
