use otlex_core::ids::{SpanId, TraceId};
use otlex_core::model::metric::{
    DataPoint, HistogramPoint, MetricData, MetricKind, PointValue, ResourceMetrics, ScopeMetrics,
};
use otlex_core::model::span::{Resource, Scope, SpanData, SpanKind, SpanStatus};
use otlex_core::model::value::AttributeMap;

pub const BASE_NANOS: u64 = 1_700_000_000_000_000_000;

fn sample_resource() -> Resource {
    let mut attributes = AttributeMap::new();
    attributes.insert("service.name".into(), "api".into());
    Resource { attributes }
}

fn sample_scope() -> Scope {
    Scope {
        name: "gateway".to_string(),
        version: Some("0.2.0".to_string()),
    }
}

/// A finished root span named `name`. The seed varies the ids and
/// timestamps so batches stay distinguishable.
pub fn sample_span(name: &str, seed: u64) -> SpanData {
    let mut trace_bytes = [0u8; 16];
    trace_bytes[8..].copy_from_slice(&seed.to_be_bytes());
    let trace_id = TraceId::from_bytes(trace_bytes);
    let span_id = SpanId::from_bytes(seed.to_be_bytes());

    SpanData {
        trace_id,
        span_id,
        parent_span_id: None,
        name: name.to_string(),
        kind: SpanKind::Server,
        start_unix_nano: BASE_NANOS + seed * 1_000_000,
        end_unix_nano: BASE_NANOS + seed * 1_000_000 + 500_000,
        status: SpanStatus::unset(),
        attributes: AttributeMap::new(),
        events: Vec::new(),
        links: Vec::new(),
        dropped_attributes_count: 0,
        dropped_events_count: 0,
        dropped_links_count: 0,
        resource: sample_resource(),
        scope: sample_scope(),
    }
}

/// A one-resource snapshot holding a single scalar metric.
pub fn scalar_snapshot(name: &str, kind: MetricKind, value: i64) -> ResourceMetrics {
    ResourceMetrics {
        resource: sample_resource(),
        scope_metrics: vec![ScopeMetrics {
            scope: sample_scope(),
            metrics: vec![MetricData {
                name: name.to_string(),
                description: String::new(),
                unit: "1".to_string(),
                kind,
                data_points: vec![DataPoint {
                    attributes: AttributeMap::new(),
                    start_time_unix_nano: Some(BASE_NANOS),
                    time_unix_nano: BASE_NANOS + 60_000_000_000,
                    value: PointValue::Int(value),
                }],
            }],
        }],
    }
}

/// A one-resource snapshot holding a single histogram metric.
pub fn histogram_snapshot(name: &str) -> ResourceMetrics {
    ResourceMetrics {
        resource: sample_resource(),
        scope_metrics: vec![ScopeMetrics {
            scope: sample_scope(),
            metrics: vec![MetricData {
                name: name.to_string(),
                description: "request latency".to_string(),
                unit: "ms".to_string(),
                kind: MetricKind::Histogram,
                data_points: vec![DataPoint {
                    attributes: AttributeMap::new(),
                    start_time_unix_nano: Some(BASE_NANOS),
                    time_unix_nano: BASE_NANOS + 60_000_000_000,
                    value: PointValue::Histogram(HistogramPoint {
                        count: 4,
                        sum: 112.5,
                        explicit_bounds: vec![10.0, 50.0, 100.0],
                        bucket_counts: vec![1, 2, 1, 0],
                        min: Some(4.0),
                        max: Some(62.0),
                    }),
                }],
            }],
        }],
    }
}
