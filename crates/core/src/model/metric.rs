use serde::{Deserialize, Serialize};

use crate::model::span::{Resource, Scope};
use crate::model::value::AttributeMap;

/// One collection cycle's snapshot for a single resource. Produced fresh
/// by the metrics SDK each cycle and consumed in the same cycle.
///
/// Field names are camelCase because this shape also doubles as the
/// dynamic collection-result boundary (see the reader's shape adapter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    #[serde(default)]
    pub resource: Resource,
    #[serde(default)]
    pub scope_metrics: Vec<ScopeMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeMetrics {
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub metrics: Vec<MetricData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricData {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub kind: MetricKind,
    #[serde(default)]
    pub data_points: Vec<DataPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    UpDownCounter,
    Histogram,
    #[default]
    Gauge,
    /// Catch-all for descriptor kinds this version does not know about.
    /// Encoded as a gauge.
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    #[serde(default)]
    pub attributes: AttributeMap,
    #[serde(default)]
    pub start_time_unix_nano: Option<u64>,
    pub time_unix_nano: u64,
    pub value: PointValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Int(i64),
    Double(f64),
    Histogram(HistogramPoint),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramPoint {
    pub count: u64,
    pub sum: f64,
    #[serde(default)]
    pub explicit_bounds: Vec<f64>,
    #[serde(default)]
    pub bucket_counts: Vec<u64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}
