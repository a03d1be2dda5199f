//! Fault taxonomy and classification.
//!
//! A [`Fault`] is the value a stage or terminal handler raises instead of
//! producing a response. Faults come in two kinds:
//!
//! - **Operational** — expected and recoverable: bad input, a missing
//!   resource, a throttled client, a flaky upstream, a blown deadline.
//!   Mapped to a specific status code; never crashes the process.
//! - **Programmer** — unexpected: broken internal state, a violated
//!   contract. Always answered with an opaque 500 and escalated toward the
//!   [`Supervisor`](crate::Supervisor) once it escapes the request's own
//!   error chain.
//!
//! [`classify`] is the single source of truth for that mapping. It is a
//! pure function — the same fault always classifies the same way — so the
//! centralized error stage, the pipeline's default 500 path, and the
//! supervisor all agree on what a fault means.

use std::time::Duration;

use thiserror::Error;

// ── Fault ─────────────────────────────────────────────────────────────────────

/// A failure raised by a stage or terminal handler.
#[derive(Clone, Debug, Error)]
pub enum Fault {
    /// A fault whose status was decided at the raise site.
    ///
    /// Always classifies as Operational — if the raiser knew the status,
    /// the failure was anticipated.
    #[error("{message}")]
    WithStatus { status: u16, message: String },

    /// The request failed validation (malformed body, missing field).
    #[error("validation: {0}")]
    Validation(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The client exceeded its admission window.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// An outbound call to a collaborating service failed.
    #[error("upstream: {0}")]
    Upstream(String),

    /// The request's deadline elapsed before a response was produced.
    #[error("deadline exceeded")]
    Timeout,

    /// Anything the taxonomy has no name for. Always a programmer error.
    #[error("internal: {0}")]
    Internal(String),
}

impl Fault {
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self::WithStatus { status, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

// ── Classification ────────────────────────────────────────────────────────────

/// Whether a fault was anticipated by the code that raised it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultKind {
    /// Expected and recoverable; the process keeps serving.
    Operational,
    /// A bug. The request gets an opaque 500; the supervisor hears about it.
    Programmer,
}

/// How loudly a classified fault should be treated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    /// Logged and answered; routine.
    Error,
    /// Grounds for process termination if unattributed to a request.
    Fatal,
}

/// The result of classifying a fault: what it is, what the client sees,
/// and how seriously the process takes it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Classification {
    pub kind: FaultKind,
    pub status: u16,
    pub severity: Severity,
}

/// Maps a fault to its kind, client-visible status, and severity.
///
/// Priority order: an explicit status hint wins; then the known operational
/// categories map to their canonical codes (400, 404, 429, 502, 504);
/// everything else is a programmer error, 500, fatal.
pub fn classify(fault: &Fault) -> Classification {
    let operational = |status| Classification {
        kind: FaultKind::Operational,
        status,
        severity: Severity::Error,
    };

    match fault {
        Fault::WithStatus { status, .. } => operational(*status),
        Fault::Validation(_)             => operational(400),
        Fault::NotFound(_)               => operational(404),
        Fault::RateLimited { .. }        => operational(429),
        Fault::Upstream(_)               => operational(502),
        Fault::Timeout                   => operational(504),
        Fault::Internal(_)               => Classification {
            kind: FaultKind::Programmer,
            status: 500,
            severity: Severity::Fatal,
        },
    }
}
