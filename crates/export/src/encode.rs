//! OTLP/JSON request-body encoding for spans and metric snapshots.
//!
//! Timestamps and 64-bit counters are rendered as decimal strings: the
//! OTLP JSON mapping requires string-typed int64/uint64, and routing
//! them through a double would corrupt values above 2^53.

use std::collections::HashMap;

use serde_json::{Map, json};

use otlex_core::error::{OtlexError, Result};
use otlex_core::model::metric::{
    DataPoint, HistogramPoint, MetricData, MetricKind, PointValue, ResourceMetrics,
};
use otlex_core::model::span::{SpanData, SpanEvent, SpanLink};
use otlex_core::model::value::{AttributeMap, Value};

const AGGREGATION_TEMPORALITY_CUMULATIVE: u8 = 2;

/// Converts a typed telemetry value into the OTLP wire union. Pure and
/// deterministic; never fails. Non-finite doubles are stringified so the
/// body never carries a JSON `null` where a number is expected.
pub fn serialize_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Str(s) => json!({ "stringValue": s }),
        Value::Int(i) => json!({ "intValue": i.to_string() }),
        Value::Double(d) if d.is_finite() => json!({ "doubleValue": d }),
        Value::Double(d) => json!({ "stringValue": d.to_string() }),
        Value::Bool(b) => json!({ "boolValue": b }),
        Value::Array(items) => json!({
            "arrayValue": {
                "values": items.iter().map(serialize_value).collect::<Vec<_>>()
            }
        }),
    }
}

/// Renders an attribute map as the ordered `{key, value}` sequence the
/// OTLP schema expects. An empty map yields an empty sequence.
pub fn serialize_attributes(attrs: &AttributeMap) -> Vec<serde_json::Value> {
    attrs
        .iter()
        .map(|(key, value)| json!({ "key": key, "value": serialize_value(value) }))
        .collect()
}

/// Encodes a non-empty span batch as an OTLP trace export request body,
/// grouping spans by (resource attribute set, scope name). Grouping uses
/// structural equality of the serialized resource attributes, so two
/// resources with equal attribute sets share one `resourceSpans` entry.
pub fn encode_spans(spans: &[SpanData]) -> Result<String> {
    let mut groups: Vec<(Vec<serde_json::Value>, String, Vec<&SpanData>)> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for span in spans {
        let resource_attrs = serialize_attributes(&span.resource.attributes);
        let resource_key = serde_json::Value::Array(resource_attrs.clone()).to_string();
        let key = (resource_key, span.scope.name.clone());
        match index.get(&key) {
            Some(&i) => groups[i].2.push(span),
            None => {
                index.insert(key, groups.len());
                groups.push((resource_attrs, span.scope.name.clone(), vec![span]));
            }
        }
    }

    let resource_spans = groups
        .into_iter()
        .map(|(resource_attrs, scope_name, members)| {
            json!({
                "resource": { "attributes": resource_attrs },
                "scopeSpans": [{
                    "scope": { "name": scope_name },
                    "spans": members.iter().map(|s| encode_span(s)).collect::<Vec<_>>()
                }]
            })
        })
        .collect::<Vec<_>>();

    serde_json::to_string(&json!({ "resourceSpans": resource_spans }))
        .map_err(|e| OtlexError::Encode(format!("span batch: {e}")))
}

fn encode_span(span: &SpanData) -> serde_json::Value {
    let mut out = Map::new();
    out.insert("traceId".into(), json!(span.trace_id.to_hex()));
    out.insert("spanId".into(), json!(span.span_id.to_hex()));
    if let Some(parent) = &span.parent_span_id {
        out.insert("parentSpanId".into(), json!(parent.to_hex()));
    }
    out.insert("name".into(), json!(span.name));
    out.insert("kind".into(), json!(span.kind.code()));
    out.insert(
        "startTimeUnixNano".into(),
        json!(span.start_unix_nano.to_string()),
    );
    out.insert(
        "endTimeUnixNano".into(),
        json!(span.end_unix_nano.to_string()),
    );
    out.insert(
        "attributes".into(),
        json!(serialize_attributes(&span.attributes)),
    );
    out.insert(
        "droppedAttributesCount".into(),
        json!(span.dropped_attributes_count),
    );
    out.insert(
        "events".into(),
        json!(span.events.iter().map(encode_event).collect::<Vec<_>>()),
    );
    out.insert("droppedEventsCount".into(), json!(span.dropped_events_count));
    out.insert(
        "links".into(),
        json!(span.links.iter().map(encode_link).collect::<Vec<_>>()),
    );
    out.insert("droppedLinksCount".into(), json!(span.dropped_links_count));

    let mut status = Map::new();
    status.insert("code".into(), json!(span.status.code.code()));
    if let Some(message) = &span.status.message {
        status.insert("message".into(), json!(message));
    }
    out.insert("status".into(), serde_json::Value::Object(status));

    serde_json::Value::Object(out)
}

fn encode_event(event: &SpanEvent) -> serde_json::Value {
    json!({
        "timeUnixNano": event.time_unix_nano.to_string(),
        "name": event.name,
        "attributes": serialize_attributes(&event.attributes),
    })
}

fn encode_link(link: &SpanLink) -> serde_json::Value {
    json!({
        "traceId": link.trace_id.to_hex(),
        "spanId": link.span_id.to_hex(),
        "attributes": serialize_attributes(&link.attributes),
    })
}

/// Encodes a non-empty batch of resource snapshots as an OTLP metric
/// export request body.
pub fn encode_metrics(batch: &[ResourceMetrics]) -> Result<String> {
    let resource_metrics = batch
        .iter()
        .map(|rm| {
            json!({
                "resource": { "attributes": serialize_attributes(&rm.resource.attributes) },
                "scopeMetrics": rm.scope_metrics.iter().map(|sm| {
                    json!({
                        "scope": { "name": sm.scope.name },
                        "metrics": sm.metrics.iter().map(encode_metric).collect::<Vec<_>>()
                    })
                }).collect::<Vec<_>>()
            })
        })
        .collect::<Vec<_>>();

    serde_json::to_string(&json!({ "resourceMetrics": resource_metrics }))
        .map_err(|e| OtlexError::Encode(format!("metric batch: {e}")))
}

fn encode_metric(metric: &MetricData) -> serde_json::Value {
    let mut out = Map::new();
    out.insert("name".into(), json!(metric.name));
    out.insert("description".into(), json!(metric.description));
    out.insert("unit".into(), json!(metric.unit));

    match metric.kind {
        MetricKind::Counter | MetricKind::UpDownCounter => {
            out.insert(
                "sum".into(),
                json!({
                    "dataPoints": number_points(&metric.data_points),
                    "aggregationTemporality": AGGREGATION_TEMPORALITY_CUMULATIVE,
                    "isMonotonic": metric.kind == MetricKind::Counter,
                }),
            );
        }
        MetricKind::Histogram => {
            out.insert(
                "histogram".into(),
                json!({
                    "dataPoints": histogram_points(&metric.data_points),
                    "aggregationTemporality": AGGREGATION_TEMPORALITY_CUMULATIVE,
                }),
            );
        }
        MetricKind::Gauge | MetricKind::Unrecognized => {
            out.insert(
                "gauge".into(),
                json!({ "dataPoints": number_points(&metric.data_points) }),
            );
        }
    }

    serde_json::Value::Object(out)
}

fn number_points(points: &[DataPoint]) -> Vec<serde_json::Value> {
    points
        .iter()
        .filter_map(|point| {
            let mut out = point_base(point);
            match &point.value {
                PointValue::Int(i) => {
                    out.insert("asInt".into(), json!(i.to_string()));
                }
                PointValue::Double(d) => {
                    out.insert("asDouble".into(), json!(finite_or_zero(*d)));
                }
                // A histogram value under a scalar descriptor has no
                // meaningful scalar rendering; drop the point.
                PointValue::Histogram(_) => return None,
            }
            Some(serde_json::Value::Object(out))
        })
        .collect()
}

fn histogram_points(points: &[DataPoint]) -> Vec<serde_json::Value> {
    points
        .iter()
        .filter_map(|point| match &point.value {
            PointValue::Histogram(h) => {
                let mut out = point_base(point);
                encode_histogram_fields(&mut out, h);
                Some(serde_json::Value::Object(out))
            }
            _ => None,
        })
        .collect()
}

// Every numeric histogram field goes through the non-finite guard: a NaN
// or infinite f64 serializes to JSON null, which collectors reject at
// the protocol level.
fn encode_histogram_fields(out: &mut Map<String, serde_json::Value>, h: &HistogramPoint) {
    out.insert("count".into(), json!(h.count.to_string()));
    out.insert("sum".into(), json!(finite_or_zero(h.sum)));
    out.insert(
        "bucketCounts".into(),
        json!(h.bucket_counts.iter().map(u64::to_string).collect::<Vec<_>>()),
    );
    out.insert(
        "explicitBounds".into(),
        json!(h.explicit_bounds.iter().map(|b| finite_or_zero(*b)).collect::<Vec<_>>()),
    );
    if let Some(min) = h.min {
        out.insert("min".into(), json!(finite_or_zero(min)));
    }
    if let Some(max) = h.max {
        out.insert("max".into(), json!(finite_or_zero(max)));
    }
}

fn point_base(point: &DataPoint) -> Map<String, serde_json::Value> {
    let mut out = Map::new();
    out.insert(
        "attributes".into(),
        json!(serialize_attributes(&point.attributes)),
    );
    if let Some(start) = point.start_time_unix_nano {
        out.insert("startTimeUnixNano".into(), json!(start.to_string()));
    }
    out.insert("timeUnixNano".into(), json!(point.time_unix_nano.to_string()));
    out
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}
