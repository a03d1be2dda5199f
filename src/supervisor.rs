//! Process-wide fault supervision.
//!
//! The [`Supervisor`] is the last line of fault handling: it hears about
//! programmer faults the error scope contained, decides what to do with
//! faults that escaped the pipeline entirely, and owns the flush-then-exit
//! sequence when the answer is "stop serving".
//!
//! There is no hidden singleton. Construct one at startup, hand it to the
//! server and to the [`Recover`](crate::middleware::Recover) stage, and the
//! dependency is visible everywhere it matters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::access_log::Sink;
use crate::fault::{classify, Fault, FaultKind};

/// What the process should do about a fault the supervisor saw.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// Keep serving.
    Continue,
    /// Stop accepting connections and exit with this status.
    ///
    /// Once a fatal fault cannot be pinned to a request, in-memory state —
    /// rate-limit windows, half-written responses — can no longer be
    /// trusted, so serving on is not an option.
    Terminate(i32),
}

/// Process-wide fault policy. Installed once at startup, torn down
/// (flushing the sink) at exit.
pub struct Supervisor {
    sink: Arc<dyn Sink>,
    reported: AtomicU64,
}

impl Supervisor {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink, reported: AtomicU64::new(0) }
    }

    /// Records a programmer fault that a request's own error chain already
    /// contained (the client got its 500). The process keeps serving.
    pub fn report(&self, fault: &Fault) {
        self.reported.fetch_add(1, Ordering::Relaxed);
        error!(fault = %fault, "programmer fault contained by error scope");
    }

    /// How many contained programmer faults have been reported.
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }

    /// Decides the fate of a fault that escaped the pipeline entirely.
    ///
    /// Operational faults are logged and survived — the offending request,
    /// if there was one, is already lost, but the process is fine.
    /// Programmer faults with no request to blame are fatal.
    pub fn on_uncaught(&self, fault: &Fault) -> Verdict {
        let class = classify(fault);
        match class.kind {
            FaultKind::Operational => {
                warn!(fault = %fault, status = class.status, "uncaught operational fault");
                Verdict::Continue
            }
            FaultKind::Programmer => {
                error!(fault = %fault, "uncaught programmer fault, terminating");
                Verdict::Terminate(1)
            }
        }
    }

    /// A failure from an async task nobody was awaiting.
    ///
    /// Always fatal: a dropped asynchronous failure has no recovery path —
    /// whatever the task was doing is in an unknowable state.
    pub fn on_unhandled_rejection(&self, fault: &Fault) -> Verdict {
        error!(fault = %fault, "unhandled async failure, terminating");
        Verdict::Terminate(1)
    }

    /// Best-effort sink flush, used on the graceful-shutdown path.
    pub async fn flush(&self) {
        if let Err(e) = self.sink.flush().await {
            error!("sink flush failed: {e}");
        }
    }

    /// Flushes the sink best-effort and exits the process. Never returns.
    pub async fn terminate(&self, code: i32) {
        self.flush().await;
        std::process::exit(code)
    }
}
