//! HTTP server: the transport in front of the pipeline.
//!
//! The server owns the listener and nothing else. It parses inbound
//! requests into [`Request`]s, hands them to [`Pipeline::dispatch`], and
//! serializes the one [`Response`] that comes back. Faults never reach it —
//! the pipeline answers those — but process-level failures do: a panicked
//! connection task is an unhandled async failure, and the [`Supervisor`]
//! decides whether the process survives it.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. Immediately stops `listener.accept()` — no new connections.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Flushes the supervisor's sink and returns, letting `main` exit 0.
//!
//! Under Kubernetes, set `terminationGracePeriodSeconds` longer than your
//! slowest request; 30 s covers most APIs.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Error;
use crate::fault::Fault;
use crate::method::Method;
use crate::pipeline::Pipeline;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;
use crate::supervisor::{Supervisor, Verdict};

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr }
    }

    /// Starts accepting connections and dispatching them through `pipeline`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing and a sink flush) —
    /// unless the supervisor rules a fault fatal, in which case the process
    /// exits non-zero from inside this call.
    pub async fn serve(
        self,
        pipeline: Pipeline,
        supervisor: Arc<Supervisor>,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;

        // Arc so the pipeline can be shared across concurrent connection
        // tasks without copying stage lists or the route table.
        let pipeline = Arc::new(pipeline);

        info!(addr = %self.addr, "strata listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all during graceful shutdown — and observe their panics.
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // `biased` checks arms top-to-bottom: a shutdown signal
                // stops accepting even if connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let pipeline = Arc::clone(&pipeline);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // `service_fn` is called once per request on the
                        // connection, not once per connection.
                        let svc = service_fn(move |req| {
                            let pipeline = Arc::clone(&pipeline);
                            async move { handle(pipeline, req, remote_addr).await }
                        });

                        // `auto::Builder` handles both HTTP/1.1 and HTTP/2,
                        // whatever the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished tasks so the JoinSet does not grow without
                // bound — and so panics surface promptly, not at shutdown.
                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    observe(&supervisor, res).await;
                }
            }
        }

        // Drain: wait for every in-flight connection before returning.
        while let Some(res) = tasks.join_next().await {
            observe(&supervisor, res).await;
        }

        supervisor.flush().await;
        info!("strata stopped");
        Ok(())
    }
}

/// Applies the supervisor's policy to one finished connection task.
///
/// A panicked task is a dropped asynchronous failure — nobody was awaiting
/// its outcome, so there is no request left to answer and no safe recovery.
async fn observe(supervisor: &Supervisor, res: Result<(), tokio::task::JoinError>) {
    let Err(join_error) = res else { return };
    if !join_error.is_panic() {
        return; // cancelled during shutdown; not a fault
    }
    let fault = Fault::internal(format!("connection task panicked: {join_error}"));
    if let Verdict::Terminate(code) = supervisor.on_unhandled_rejection(&fault) {
        supervisor.terminate(code).await;
    }
}

// ── Request translation ───────────────────────────────────────────────────────

/// Core hot path: translates one hyper request, dispatches it, and
/// translates the response back.
///
/// The error type is [`Infallible`](std::convert::Infallible) — every
/// failure becomes a response here, so hyper never sees an error.
async fn handle(
    pipeline: Arc<Pipeline>,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<http_body_util::Full<bytes::Bytes>>, std::convert::Infallible> {
    // Unknown methods are rejected here, before the pipeline exists to them.
    let Ok(method) = Method::from_str(req.method().as_str()) else {
        return Ok(Response::status(Status::MethodNotAllowed).into_http());
    };

    let path = req.uri().path().to_owned();
    let query = req.uri().query().unwrap_or("").to_owned();

    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                value.to_str().unwrap_or("").to_owned(),
            )
        })
        .collect();
    let client = client_identity(&headers, remote_addr);

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        // The client stopped sending mid-body; nothing worth dispatching.
        Err(_) => return Ok(Response::status(Status::BadRequest).into_http()),
    };

    let request = Request::new(method, path)
        .with_query(query)
        .with_headers(headers)
        .with_body(body)
        .with_client(client);

    Ok(pipeline.dispatch(request).await.into_http())
}

/// Client identity: first `x-forwarded-for` entry (the proxy in front of us
/// appends, so the first entry is the original client), else the peer IP.
fn client_identity(headers: &[(String, String)], remote_addr: SocketAddr) -> String {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("x-forwarded-for"))
        .and_then(|(_, value)| value.split(',').next())
        .map(|ip| ip.trim().to_owned())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| remote_addr.ip().to_string())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by orchestrators) and
/// **SIGINT** (Ctrl-C, for local dev). On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // `pending()` never resolves — on non-Unix platforms the SIGTERM arm
    // is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
