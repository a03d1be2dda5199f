//! Structured access logging.
//!
//! Every request/response exchange becomes one immutable [`AccessRecord`],
//! appended to a [`Sink`]. The record is a pure transform of what the
//! pipeline already knows — building one never fails and never blocks.
//!
//! Sinks may buffer and flush asynchronously; the contract is at-least-once
//! durability relative to process-initiated shutdown (the server flushes on
//! graceful shutdown, the supervisor flushes before a fatal exit). Crash
//! consistency beyond that is out of scope.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::middleware::BoxFuture;
use crate::request::RequestMeta;

// ── AccessRecord ──────────────────────────────────────────────────────────────

/// One structured access-log entry. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AccessRecord {
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    /// Response body size in bytes.
    pub bytes: u64,
    pub elapsed_ms: u64,
    pub client: String,
    pub agent: Option<String>,
}

impl AccessRecord {
    /// Sentinel status recorded when the client abandoned the connection
    /// before a response existed.
    pub const ABORTED: u16 = 0;

    /// Builds the record for a completed exchange.
    pub fn of(meta: &RequestMeta, status: u16, bytes: u64, elapsed: Duration) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            method: meta.method.to_string(),
            path: meta.path.clone(),
            status,
            bytes,
            elapsed_ms: elapsed.as_millis() as u64,
            client: meta.client.clone(),
            agent: meta.agent.clone(),
        }
    }
}

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Where access records and diagnostic records go to become durable.
///
/// `append` is fire-and-forget from the caller's perspective; `flush` is
/// the durability point, awaited on shutdown paths only.
pub trait Sink: Send + Sync + 'static {
    fn append(&self, record: AccessRecord);

    fn flush(&self) -> BoxFuture<'_, std::io::Result<()>>;
}

// ── FileSink ──────────────────────────────────────────────────────────────────

enum SinkOp {
    Write(AccessRecord),
    Flush(oneshot::Sender<std::io::Result<()>>),
}

/// Appends records as JSON lines to a log file.
///
/// Writes go through an unbounded channel to a dedicated writer task, so
/// `append` never blocks a request. `flush` round-trips an ack through the
/// task, which is what makes shutdown durable.
pub struct FileSink {
    tx: mpsc::UnboundedSender<SinkOp>,
}

impl FileSink {
    /// Opens (or creates) the log file in append mode and starts the
    /// writer task. Must be called from within a tokio runtime.
    pub async fn create(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut writer = BufWriter::new(file);
            while let Some(op) = rx.recv().await {
                match op {
                    SinkOp::Write(record) => {
                        let mut line = match serde_json::to_vec(&record) {
                            Ok(line) => line,
                            Err(e) => {
                                error!("unencodable access record: {e}");
                                continue;
                            }
                        };
                        line.push(b'\n');
                        if let Err(e) = writer.write_all(&line).await {
                            error!("access log write failed: {e}");
                        }
                    }
                    SinkOp::Flush(ack) => {
                        let _ = ack.send(writer.flush().await);
                    }
                }
            }
            // Channel closed: the sink was dropped. Last chance to drain.
            if let Err(e) = writer.flush().await {
                error!("access log final flush failed: {e}");
            }
        });

        Ok(Self { tx })
    }
}

impl Sink for FileSink {
    fn append(&self, record: AccessRecord) {
        // A closed channel means the writer task is gone; the record is lost
        // and there is no one left to tell.
        let _ = self.tx.send(SinkOp::Write(record));
    }

    fn flush(&self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            let (ack_tx, ack_rx) = oneshot::channel();
            self.tx
                .send(SinkOp::Flush(ack_tx))
                .map_err(|_| std::io::Error::other("access log writer task is gone"))?;
            ack_rx
                .await
                .map_err(|_| std::io::Error::other("access log writer task is gone"))?
        })
    }
}

// ── TracingSink ───────────────────────────────────────────────────────────────

/// Emits each record as a `tracing` event, target `access`.
///
/// Nothing to flush — durability is whatever the installed subscriber
/// provides.
pub struct TracingSink;

impl Sink for TracingSink {
    fn append(&self, record: AccessRecord) {
        info!(
            target: "access",
            method = %record.method,
            path = %record.path,
            status = record.status,
            bytes = record.bytes,
            elapsed_ms = record.elapsed_ms,
            client = %record.client,
            agent = record.agent.as_deref().unwrap_or("-"),
        );
    }

    fn flush(&self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

// ── MemorySink ────────────────────────────────────────────────────────────────

/// Collects records in memory. For tests and assertions, not production.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<AccessRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AccessRecord> {
        self.records.lock().expect("memory sink mutex poisoned").clone()
    }
}

impl Sink for MemorySink {
    fn append(&self, record: AccessRecord) {
        self.records.lock().expect("memory sink mutex poisoned").push(record);
    }

    fn flush(&self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

// ── AccessLog ─────────────────────────────────────────────────────────────────

/// The pipeline's access logger: one record per request, no exceptions.
///
/// The pipeline invokes this exactly once per dispatch, after the response
/// is final — success, error-scope response, or abandonment.
#[derive(Clone)]
pub struct AccessLog {
    sink: Arc<dyn Sink>,
}

impl AccessLog {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    pub(crate) fn on_complete(
        &self,
        meta: &RequestMeta,
        status: u16,
        bytes: u64,
        elapsed: Duration,
    ) {
        self.sink.append(AccessRecord::of(meta, status, bytes, elapsed));
    }

    pub(crate) fn on_abandoned(&self, meta: &RequestMeta, elapsed: Duration) {
        self.sink
            .append(AccessRecord::of(meta, AccessRecord::ABORTED, 0, elapsed));
    }
}
