//! Timer-driven metric collection and export.
//!
//! The reader pulls a snapshot from the metrics SDK each interval,
//! normalizes the dynamically-shaped collection result through a single
//! boundary adapter, and pushes the encoded batch through the transport.
//! A failed cycle is logged and isolated; the timer always continues.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use otlex_core::config::ExportConfig;
use otlex_core::error::Result;
use otlex_core::model::metric::ResourceMetrics;

use crate::encode;
use crate::transport::{DeliveryStats, OtlpHttpTransport, Signal, Transport};

/// Collection capability injected by the metrics SDK. The result is
/// dynamically shaped; see [`normalize_collection`].
pub trait MetricSource: Send + Sync + 'static {
    fn collect(&self, timeout: Duration) -> BoxFuture<'_, Result<serde_json::Value>>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReaderStats {
    pub export_interval_ms: u64,
    pub cycles: u64,
    pub empty_cycles: u64,
    pub delivery: DeliveryStats,
}

pub struct PeriodicMetricReader {
    inner: Arc<Inner>,
    ctrl_tx: mpsc::Sender<oneshot::Sender<()>>,
    stop_tx: watch::Sender<bool>,
    shutdown_done: AtomicBool,
}

struct Inner {
    source: Arc<dyn MetricSource>,
    transport: Arc<dyn Transport>,
    collect_timeout: Duration,
    export_interval: Duration,
    debug: bool,
    cycles: AtomicU64,
    empty_cycles: AtomicU64,
}

impl PeriodicMetricReader {
    /// Starts the export timer; must be called from within a tokio
    /// runtime.
    pub fn new(
        cfg: &ExportConfig,
        source: Arc<dyn MetricSource>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let inner = Arc::new(Inner {
            source,
            transport,
            collect_timeout: cfg.collect_timeout,
            export_interval: cfg.export_interval,
            debug: cfg.debug,
            cycles: AtomicU64::new(0),
            empty_cycles: AtomicU64::new(0),
        });

        let (ctrl_tx, ctrl_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(run_reader(inner.clone(), ctrl_rx, stop_rx));

        Self {
            inner,
            ctrl_tx,
            stop_tx,
            shutdown_done: AtomicBool::new(false),
        }
    }

    pub fn with_http_transport(cfg: &ExportConfig, source: Arc<dyn MetricSource>) -> Result<Self> {
        let transport = Arc::new(OtlpHttpTransport::new(cfg)?);
        Ok(Self::new(cfg, source, transport))
    }

    /// Runs one collection-and-export cycle immediately and awaits it.
    /// Resolves without error after shutdown.
    pub async fn force_flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.ctrl_tx.send(ack_tx).await.is_err() {
            return Ok(());
        }
        let _ = ack_rx.await;
        Ok(())
    }

    /// Stops the timer, runs one final cycle, then shuts the transport
    /// down. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.force_flush().await?;
        let _ = self.stop_tx.send(true);
        self.inner.transport.shutdown().await
    }

    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            export_interval_ms: self.inner.export_interval.as_millis() as u64,
            cycles: self.inner.cycles.load(Ordering::Relaxed),
            empty_cycles: self.inner.empty_cycles.load(Ordering::Relaxed),
            delivery: self.inner.transport.stats(),
        }
    }
}

async fn run_reader(
    inner: Arc<Inner>,
    mut ctrl_rx: mpsc::Receiver<oneshot::Sender<()>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let start = tokio::time::Instant::now() + inner.export_interval;
    let mut ticker = tokio::time::interval_at(start, inner.export_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_cycle(&inner).await;
            }
            req = ctrl_rx.recv() => {
                match req {
                    Some(ack) => {
                        run_cycle(&inner).await;
                        let _ = ack.send(());
                    }
                    None => break,
                }
            }
            _ = stop_rx.changed() => break,
        }
    }
}

/// One collection-and-export cycle. Errors are contained here so a bad
/// cycle never halts future collection.
async fn run_cycle(inner: &Inner) {
    inner.cycles.fetch_add(1, Ordering::Relaxed);

    let collected = match tokio::time::timeout(
        inner.collect_timeout,
        inner.source.collect(inner.collect_timeout),
    )
    .await
    {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            warn!(error = %e, "metric collection failed; skipping cycle");
            return;
        }
        Err(_) => {
            warn!(
                timeout_ms = inner.collect_timeout.as_millis() as u64,
                "metric collection timed out; skipping cycle"
            );
            return;
        }
    };

    let batch = normalize_collection(collected, inner.debug);
    if batch.is_empty() {
        inner.empty_cycles.fetch_add(1, Ordering::Relaxed);
        if inner.debug {
            debug!("no metrics this cycle");
        }
        return;
    }

    match encode::encode_metrics(&batch) {
        Ok(body) => {
            let _ = inner.transport.send(Signal::Metrics, body).await;
        }
        Err(e) => {
            warn!(error = %e, "failed to encode metric batch; dropped");
        }
    }
}

/// Boundary adapter for the metrics SDK's collection result, which is
/// observed to vary across versions: a bare array of resource snapshots,
/// an array or single snapshot wrapped under `resourceMetrics`, or a
/// bare snapshot identified by its `resource` field. Anything else means
/// no metrics this cycle. Shape changes land here and nowhere else.
pub fn normalize_collection(raw: serde_json::Value, debug: bool) -> Vec<ResourceMetrics> {
    let (shape, items) = match raw {
        serde_json::Value::Array(items) => ("array", items),
        serde_json::Value::Object(mut map) => match map.remove("resourceMetrics") {
            Some(serde_json::Value::Array(items)) => ("wrapped_array", items),
            Some(inner @ serde_json::Value::Object(_)) => ("wrapped_object", vec![inner]),
            Some(_) => ("unrecognized", Vec::new()),
            None if map.contains_key("resource") => (
                "bare_resource",
                vec![serde_json::Value::Object(map)],
            ),
            None => ("unrecognized", Vec::new()),
        },
        _ => ("unrecognized", Vec::new()),
    };

    if debug {
        debug!(shape, count = items.len(), "normalized collection result");
    }

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<ResourceMetrics>(item) {
            Ok(rm) => Some(rm),
            Err(e) => {
                debug!(error = %e, "skipping malformed resource snapshot");
                None
            }
        })
        .collect()
}
