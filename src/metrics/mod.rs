// Transcription API metrics for monitoring and observability
//
// Job outcomes, admission decisions and cache behavior are recorded through
// the `Metrics` facade and exported in Prometheus text format.

pub mod error;
#[allow(clippy::module_inception)]
pub mod metrics;
pub mod null;
pub mod prometheus;


pub use error::MetricsError;
pub use metrics::{create_metrics_exporter, Metrics, MetricsExporter};
