pub mod encode;
pub mod processor;
pub mod reader;
pub mod transport;

pub use processor::{BatchSpanProcessor, ProcessorStats, SpanProcessor};
pub use reader::{MetricSource, PeriodicMetricReader, ReaderStats};
pub use transport::{DeliveryStats, OtlpHttpTransport, Signal, Transport};
