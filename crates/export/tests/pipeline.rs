//! End-to-end pipeline tests against an in-process collector stub.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use futures::future::BoxFuture;

use otlex_core::config::ExportConfig;
use otlex_core::model::metric::MetricKind;
use otlex_export::processor::{BatchSpanProcessor, SpanProcessor};
use otlex_export::reader::{MetricSource, PeriodicMetricReader};
use testkit::{sample_span, scalar_snapshot};

type Received = Arc<Mutex<Vec<(String, String)>>>;

async fn spawn_collector() -> (String, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));

    async fn capture(path: &str, received: Received, body: String) -> StatusCode {
        received.lock().unwrap().push((path.to_string(), body));
        StatusCode::OK
    }

    let app = Router::new()
        .route(
            "/v1/traces",
            post(|State(state): State<Received>, body: String| async move {
                capture("traces", state, body).await
            }),
        )
        .route(
            "/v1/metrics",
            post(|State(state): State<Received>, body: String| async move {
                capture("metrics", state, body).await
            }),
        )
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), received)
}

fn pipeline_config(endpoint: &str) -> ExportConfig {
    ExportConfig {
        endpoint: endpoint.to_string(),
        max_batch_size: 2,
        max_queue_size: 10,
        scheduled_delay: Duration::from_secs(100_000),
        export_interval: Duration::from_secs(100_000),
        request_timeout: Duration::from_secs(2),
        ..ExportConfig::default()
    }
}

struct StaticSource;

impl MetricSource for StaticSource {
    fn collect(&self, _timeout: Duration) -> BoxFuture<'_, otlex_core::Result<serde_json::Value>> {
        let wrapped = serde_json::json!({
            "resourceMetrics": [
                serde_json::to_value(scalar_snapshot("requests_total", MetricKind::Counter, 9))
                    .unwrap()
            ]
        });
        Box::pin(futures::future::ready(Ok(wrapped)))
    }
}

#[tokio::test]
async fn spans_flow_to_collector_in_batches() {
    let (endpoint, received) = spawn_collector().await;
    let cfg = pipeline_config(&endpoint);
    let processor = BatchSpanProcessor::with_http_transport(&cfg).unwrap();

    processor.on_end(sample_span("a", 1));
    processor.on_end(sample_span("b", 2));
    processor.on_end(sample_span("c", 3));
    tokio::time::sleep(Duration::from_millis(200)).await;

    {
        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 1, "threshold flush should send exactly one batch");
        assert!(bodies[0].1.contains("\"name\":\"a\""));
        assert!(bodies[0].1.contains("\"name\":\"b\""));
        assert!(!bodies[0].1.contains("\"name\":\"c\""));
    }

    processor.force_flush().await.unwrap();
    {
        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 2);
        assert!(bodies[1].1.contains("\"name\":\"c\""));
    }

    let stats = processor.stats();
    assert_eq!(stats.queue_size, 0);
    assert_eq!(stats.delivery.successes, 2);
    assert_eq!(stats.delivery.failures, 0);

    processor.shutdown().await.unwrap();
}

#[tokio::test]
async fn metrics_flow_to_collector_on_flush() {
    let (endpoint, received) = spawn_collector().await;
    let cfg = pipeline_config(&endpoint);
    let reader = PeriodicMetricReader::with_http_transport(&cfg, Arc::new(StaticSource)).unwrap();

    reader.force_flush().await.unwrap();

    {
        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].0, "metrics");
        assert!(bodies[0].1.contains("requests_total"));
        assert!(bodies[0].1.contains("\"isMonotonic\":true"));
    }

    let stats = reader.stats();
    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.delivery.successes, 1);

    reader.shutdown().await.unwrap();
}

#[tokio::test]
async fn delivery_failure_is_contained_and_counted() {
    // Nothing listens here; the send fails without panicking or
    // propagating into the caller.
    let cfg = pipeline_config("http://127.0.0.1:9");
    let processor = BatchSpanProcessor::with_http_transport(&cfg).unwrap();

    processor.on_end(sample_span("doomed", 1));
    processor.force_flush().await.unwrap();

    let stats = processor.stats();
    assert_eq!(stats.delivery.failures, 1);
    assert_eq!(stats.delivery.successes, 0);
    assert!(stats.delivery.last_error.is_some());
    assert_eq!(stats.queue_size, 0, "failed batch is dropped, not re-queued");
}
