//! Buffering batch processor for finished spans.
//!
//! Spans arrive synchronously via `on_end` and are appended to a bounded
//! buffer. A single export worker splices batches off the front of the
//! buffer before any network I/O begins, so overlapping flush triggers
//! always operate on disjoint entries and arrival order is preserved on
//! the wire.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tracing::{debug, warn};

use otlex_core::config::ExportConfig;
use otlex_core::error::Result;
use otlex_core::model::span::SpanData;

use crate::encode;
use crate::transport::{DeliveryStats, OtlpHttpTransport, Signal, Transport};

/// Processor interface exposed upward to the tracing SDK.
pub trait SpanProcessor: Send + Sync {
    /// Called when a span starts. Spans are only interesting once ended.
    fn on_start(&self, span: &SpanData);

    /// Called when a span ends; hands ownership of the snapshot to the
    /// processor.
    fn on_end(&self, span: SpanData);

    fn force_flush(&self) -> BoxFuture<'_, Result<()>>;

    fn shutdown(&self) -> BoxFuture<'_, Result<()>>;
}

/// Read-only snapshot of processor state and limits.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessorStats {
    pub queue_size: usize,
    pub max_batch_size: usize,
    pub max_queue_size: usize,
    pub dropped_spans: u64,
    pub delivery: DeliveryStats,
}

pub struct BatchSpanProcessor {
    inner: Arc<Inner>,
    ctrl_tx: mpsc::Sender<oneshot::Sender<()>>,
    stop_tx: watch::Sender<bool>,
    shutdown_done: AtomicBool,
}

struct Inner {
    buffer: Mutex<Vec<SpanData>>,
    flush_notify: Notify,
    shutting_down: AtomicBool,
    dropped_spans: AtomicU64,
    max_batch_size: usize,
    max_queue_size: usize,
    debug: bool,
    transport: Arc<dyn Transport>,
}

impl BatchSpanProcessor {
    /// Spawns the export worker and the scheduled-delay timer; must be
    /// called from within a tokio runtime.
    pub fn new(cfg: &ExportConfig, transport: Arc<dyn Transport>) -> Self {
        let inner = Arc::new(Inner {
            buffer: Mutex::new(Vec::new()),
            flush_notify: Notify::new(),
            shutting_down: AtomicBool::new(false),
            dropped_spans: AtomicU64::new(0),
            max_batch_size: cfg.max_batch_size,
            max_queue_size: cfg.max_queue_size,
            debug: cfg.debug,
            transport,
        });

        let (ctrl_tx, ctrl_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(run_export_worker(
            inner.clone(),
            ctrl_rx,
            stop_rx,
            cfg.scheduled_delay,
        ));

        Self {
            inner,
            ctrl_tx,
            stop_tx,
            shutdown_done: AtomicBool::new(false),
        }
    }

    pub fn with_http_transport(cfg: &ExportConfig) -> Result<Self> {
        let transport = Arc::new(OtlpHttpTransport::new(cfg)?);
        Ok(Self::new(cfg, transport))
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            queue_size: lock_buffer(&self.inner.buffer).len(),
            max_batch_size: self.inner.max_batch_size,
            max_queue_size: self.inner.max_queue_size,
            dropped_spans: self.inner.dropped_spans.load(Ordering::Relaxed),
            delivery: self.inner.transport.stats(),
        }
    }

    /// Requests one flush from the worker and awaits its completion.
    /// Resolves without error after shutdown (nothing left to flush).
    async fn flush_and_wait(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.ctrl_tx.send(ack_tx).await.is_err() {
            return Ok(());
        }
        let _ = ack_rx.await;
        Ok(())
    }

    async fn do_shutdown(&self) -> Result<()> {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        // One final flush before the worker and timer stop.
        self.flush_and_wait().await?;
        let _ = self.stop_tx.send(true);
        self.inner.transport.shutdown().await
    }
}

impl SpanProcessor for BatchSpanProcessor {
    fn on_start(&self, _span: &SpanData) {}

    fn on_end(&self, span: SpanData) {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            // No delivery guarantee remains; drop rather than queue.
            return;
        }

        let trigger_flush = {
            let mut buffer = lock_buffer(&self.inner.buffer);
            buffer.push(span);

            if buffer.len() > self.inner.max_queue_size {
                // Overflow: keep only the most recent max_batch_size
                // entries, dropping from the front. Saturates so a
                // batch limit above the queue limit trims nothing
                // rather than underflowing.
                let keep = buffer.len().min(self.inner.max_batch_size);
                let excess = buffer.len() - keep;
                if excess > 0 {
                    buffer.drain(..excess);
                    self.inner
                        .dropped_spans
                        .fetch_add(excess as u64, Ordering::Relaxed);
                    warn!(dropped = excess, "span queue overflow; dropped oldest entries");
                }
            }

            buffer.len() >= self.inner.max_batch_size
        };

        if trigger_flush {
            self.inner.flush_notify.notify_one();
        }
    }

    fn force_flush(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.flush_and_wait())
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.do_shutdown())
    }
}

async fn run_export_worker(
    inner: Arc<Inner>,
    mut ctrl_rx: mpsc::Receiver<oneshot::Sender<()>>,
    mut stop_rx: watch::Receiver<bool>,
    scheduled_delay: std::time::Duration,
) {
    let start = tokio::time::Instant::now() + scheduled_delay;
    let mut ticker = tokio::time::interval_at(start, scheduled_delay);

    loop {
        tokio::select! {
            _ = inner.flush_notify.notified() => {
                flush_once(&inner).await;
            }
            _ = ticker.tick() => {
                flush_once(&inner).await;
            }
            req = ctrl_rx.recv() => {
                match req {
                    Some(ack) => {
                        flush_once(&inner).await;
                        let _ = ack.send(());
                    }
                    None => break,
                }
            }
            _ = stop_rx.changed() => break,
        }
    }
}

/// Splices up to `max_batch_size` entries off the front of the buffer
/// synchronously, then encodes and sends them. No-op on an empty
/// buffer. A failed export is logged by the transport and the batch is
/// dropped; it is never re-queued.
async fn flush_once(inner: &Inner) {
    let batch: Vec<SpanData> = {
        let mut buffer = lock_buffer(&inner.buffer);
        if buffer.is_empty() {
            return;
        }
        let n = buffer.len().min(inner.max_batch_size);
        let batch = buffer.drain(..n).collect();
        // Re-arm if a full batch is still waiting behind this one.
        if buffer.len() >= inner.max_batch_size {
            inner.flush_notify.notify_one();
        }
        batch
    };

    if inner.debug {
        debug!(count = batch.len(), "flushing span batch");
    }

    match encode::encode_spans(&batch) {
        Ok(body) => {
            let _ = inner.transport.send(Signal::Traces, body).await;
        }
        Err(e) => {
            warn!(error = %e, count = batch.len(), "failed to encode span batch; dropped");
        }
    }
}

fn lock_buffer(buffer: &Mutex<Vec<SpanData>>) -> MutexGuard<'_, Vec<SpanData>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
