use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use otlex_core::config::ExportConfig;
use otlex_core::error::{OtlexError, Result};

/// Telemetry signal kind, selecting the collector path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Traces,
    Metrics,
    Logs,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
        }
    }
}

/// Cumulative delivery counters for one transport instance. Reset only
/// on process restart.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DeliveryStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub bytes_sent: u64,
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Seam between the batching components and the wire. The HTTP
/// implementation below is the production one; tests inject recorders.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, signal: Signal, payload: String) -> BoxFuture<'static, Result<()>>;

    fn stats(&self) -> DeliveryStats;

    fn shutdown(&self) -> BoxFuture<'static, Result<()>>;
}

/// POSTs OTLP/JSON bodies to `<endpoint>/v1/{signal}`. Does not retry:
/// a failed batch is recorded and dropped by the caller, never
/// re-queued, so a downstream outage cannot grow memory without bound.
#[derive(Clone)]
pub struct OtlpHttpTransport {
    client: Client,
    endpoint: String,
    traces_endpoint: Option<String>,
    metrics_endpoint: Option<String>,
    logs_endpoint: Option<String>,
    headers: HeaderMap,
    debug: bool,
    stats: Arc<Mutex<DeliveryStats>>,
    closed: Arc<AtomicBool>,
}

impl OtlpHttpTransport {
    pub fn new(cfg: &ExportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| OtlexError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            traces_endpoint: cfg.traces_endpoint.clone(),
            metrics_endpoint: cfg.metrics_endpoint.clone(),
            logs_endpoint: cfg.logs_endpoint.clone(),
            headers: build_headers(&cfg.headers),
            debug: cfg.debug,
            stats: Arc::new(Mutex::new(DeliveryStats::default())),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn url_for(&self, signal: Signal) -> String {
        let override_url = match signal {
            Signal::Traces => &self.traces_endpoint,
            Signal::Metrics => &self.metrics_endpoint,
            Signal::Logs => &self.logs_endpoint,
        };
        match override_url {
            Some(url) => url.clone(),
            None => format!("{}/v1/{}", self.endpoint, signal.as_str()),
        }
    }

    async fn post(self, signal: Signal, payload: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OtlexError::Transport(
                "transport is shut down".to_string(),
            ));
        }

        let url = self.url_for(signal);
        let body_len = payload.len() as u64;
        {
            let mut stats = lock_stats(&self.stats);
            stats.attempts += 1;
            stats.last_attempt = Some(Utc::now());
        }

        let result = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .headers(self.headers.clone())
            .body(payload)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                let mut stats = lock_stats(&self.stats);
                stats.successes += 1;
                stats.bytes_sent += body_len;
                if self.debug {
                    tracing::debug!(signal = signal.as_str(), bytes = body_len, "export delivered");
                }
                Ok(())
            }
            Ok(resp) => {
                let error = format!("collector returned {}", resp.status());
                self.record_failure(signal, &error);
                Err(OtlexError::Transport(error))
            }
            Err(e) => {
                let error = e.to_string();
                self.record_failure(signal, &error);
                Err(OtlexError::Transport(error))
            }
        }
    }

    fn record_failure(&self, signal: Signal, error: &str) {
        let mut stats = lock_stats(&self.stats);
        stats.failures += 1;
        stats.last_error = Some(error.to_string());
        tracing::warn!(signal = signal.as_str(), error, "export delivery failed; batch dropped");
    }
}

impl Transport for OtlpHttpTransport {
    fn send(&self, signal: Signal, payload: String) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        Box::pin(this.post(signal, payload))
    }

    fn stats(&self) -> DeliveryStats {
        lock_stats(&self.stats).clone()
    }

    fn shutdown(&self) -> BoxFuture<'static, Result<()>> {
        self.closed.store(true, Ordering::SeqCst);
        Box::pin(futures::future::ready(Ok(())))
    }
}

fn lock_stats(stats: &Mutex<DeliveryStats>) -> std::sync::MutexGuard<'_, DeliveryStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn build_headers(headers: &[(String, String)]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::try_from(k.as_str());
        let value = HeaderValue::try_from(v.as_str());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                out.insert(name, value);
            }
            _ => {
                tracing::warn!(header = %k, "ignored invalid export header");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;

    use super::*;

    fn test_config(endpoint: &str) -> ExportConfig {
        ExportConfig {
            endpoint: endpoint.to_string(),
            request_timeout: std::time::Duration::from_secs(2),
            ..ExportConfig::default()
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn build_headers_skips_invalid_entries() {
        let headers = build_headers(&[
            ("x-tenant".to_string(), "dev".to_string()),
            ("bad header".to_string(), "v".to_string()),
        ]);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-tenant").unwrap(), "dev");
    }

    #[tokio::test]
    async fn send_success_updates_stats() {
        let endpoint = serve(Router::new().route("/v1/traces", post(|| async { StatusCode::OK }))).await;
        let transport = OtlpHttpTransport::new(&test_config(&endpoint)).unwrap();

        transport
            .send(Signal::Traces, "{\"resourceSpans\":[]}".to_string())
            .await
            .unwrap();

        let stats = transport.stats();
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 0);
        assert!(stats.bytes_sent > 0);
        assert!(stats.last_error.is_none());
    }

    #[tokio::test]
    async fn send_non_2xx_counts_as_failure() {
        let endpoint = serve(Router::new().route(
            "/v1/metrics",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let transport = OtlpHttpTransport::new(&test_config(&endpoint)).unwrap();

        let result = transport.send(Signal::Metrics, "{}".to_string()).await;
        assert!(result.is_err());

        let stats = transport.stats();
        assert_eq!(stats.failures, 1);
        assert!(stats.last_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn send_to_unreachable_endpoint_returns_error_not_panic() {
        let transport = OtlpHttpTransport::new(&test_config("http://127.0.0.1:9")).unwrap();

        let result = transport.send(Signal::Traces, "{}".to_string()).await;
        assert!(result.is_err());
        assert_eq!(transport.stats().failures, 1);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_blocks_sends() {
        let transport = OtlpHttpTransport::new(&test_config("http://127.0.0.1:9")).unwrap();
        transport.shutdown().await.unwrap();
        transport.shutdown().await.unwrap();

        let result = transport.send(Signal::Traces, "{}".to_string()).await;
        assert!(result.is_err());
        // Never attempted: the failure is local, not a delivery failure.
        assert_eq!(transport.stats().attempts, 0);
    }

    #[test]
    fn per_signal_endpoint_override_wins() {
        let cfg = ExportConfig {
            endpoint: "http://base:4318/".to_string(),
            traces_endpoint: Some("http://traces:9999/custom".to_string()),
            ..ExportConfig::default()
        };
        let transport = OtlpHttpTransport::new(&cfg).unwrap();
        assert_eq!(transport.url_for(Signal::Traces), "http://traces:9999/custom");
        assert_eq!(transport.url_for(Signal::Metrics), "http://base:4318/v1/metrics");
    }
}
