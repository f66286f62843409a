//! Controller observability: Prometheus metric families, the polling
//! collector that mirrors tc counters and active policies into them, and
//! the HTTP exposition endpoint.

pub mod collector;
pub mod exporter;
pub mod metrics;

pub use collector::{IntentSource, MetricsCollector};
pub use exporter::MetricsExporter;
pub use metrics::ControllerMetrics;
