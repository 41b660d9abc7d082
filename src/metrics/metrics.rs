//! Metrics facade and exporter trait
//!
//! Components record through [`Metrics`], a cheap-to-clone handle over a
//! pluggable [`MetricsExporter`]. The facade validates names and labels before
//! they reach the backend, and by default logs metric errors instead of
//! returning them so that observability can never fail a job.
//!
//! ```rust,no_run
//! use transcribe_api::metrics::{create_metrics_exporter, Metrics};
//!
//! # async fn example() -> Result<(), transcribe_api::metrics::MetricsError> {
//! let metrics = Metrics::new(create_metrics_exporter("prometheus")?);
//! metrics.record_submission("accepted").await;
//! let text = metrics.export().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::error::{validation, MetricsError};
use crate::metrics::null::NullExporter;
use crate::metrics::prometheus::PrometheusExporter;
use crate::models::TaskStatus;

/// Metrics exporter trait for pluggable monitoring systems
#[async_trait]
pub trait MetricsExporter: Send + Sync {
    /// Increment a counter metric by 1
    async fn increment(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError>;

    /// Set a gauge metric to a specific value
    async fn set_gauge(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError>;

    /// Observe a value in a histogram metric
    async fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError>;

    /// Export metrics in the format expected by the monitoring system
    async fn export(&self) -> Result<Vec<u8>, MetricsError>;
}

/// Metrics facade for the application
#[derive(Clone)]
pub struct Metrics {
    exporter: Arc<dyn MetricsExporter>,
    propagate_errors: bool,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("propagate_errors", &self.propagate_errors)
            .finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new(exporter: Arc<dyn MetricsExporter>) -> Self {
        Self {
            exporter,
            propagate_errors: false,
        }
    }

    /// Facade that returns exporter errors instead of logging them
    pub fn with_error_propagation(exporter: Arc<dyn MetricsExporter>) -> Self {
        Self {
            exporter,
            propagate_errors: true,
        }
    }

    /// Facade over the null exporter
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullExporter))
    }

    fn settle(&self, result: Result<(), MetricsError>, operation: &str, name: &str) -> Result<(), MetricsError> {
        match result {
            Err(e) if self.propagate_errors => Err(e),
            Err(e) => {
                warn!("Metrics {} failed for '{}': {}", operation, name, e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    pub async fn increment(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        let result = match validation::validate_metric_name(name)
            .and_then(|_| validation::validate_labels(labels))
        {
            Ok(()) => self.exporter.increment(name, labels).await,
            Err(e) => Err(e),
        };
        self.settle(result, "increment", name)
    }

    pub async fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        let result = match validation::validate_metric_name(name)
            .and_then(|_| validation::validate_labels(labels))
            .and_then(|_| validation::validate_numeric_value(value))
        {
            Ok(()) => self.exporter.set_gauge(name, value, labels).await,
            Err(e) => Err(e),
        };
        self.settle(result, "set_gauge", name)
    }

    pub async fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        let result = match validation::validate_metric_name(name)
            .and_then(|_| validation::validate_labels(labels))
            .and_then(|_| validation::validate_numeric_value(value))
        {
            Ok(()) => self.exporter.observe_histogram(name, value, labels).await,
            Err(e) => Err(e),
        };
        self.settle(result, "observe_histogram", name)
    }

    /// Export metrics in the format expected by the monitoring system
    pub async fn export(&self) -> Result<Vec<u8>, MetricsError> {
        self.exporter.export().await
    }

    // Domain helpers. They never fail; errors were already logged by `settle`.

    /// Record the intake outcome of a request
    /// ("accepted", "cached", "rate_limited", "queue_full", "shutting_down")
    pub async fn record_submission(&self, outcome: &str) {
        let _ = self
            .increment("submissions_total", &[("outcome", outcome)])
            .await;
    }

    pub async fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        let _ = self
            .increment("cache_lookups_total", &[("result", result)])
            .await;
    }

    /// Record a job reaching a terminal state after `duration` in `started`
    pub async fn record_job_completed(&self, status: TaskStatus, duration: Duration) {
        let labels = [("status", status.as_str())];
        let _ = self
            .observe_histogram("job_duration_seconds", duration.as_secs_f64(), &labels)
            .await;
        let _ = self.increment("jobs_completed_total", &labels).await;
    }

    pub async fn set_queue_depth(&self, depth: usize) {
        self.set_count_gauge("queue_depth", depth).await;
    }

    pub async fn set_active_workers(&self, count: usize) {
        self.set_count_gauge("active_workers", count).await;
    }

    async fn set_count_gauge(&self, name: &str, count: usize) {
        match validation::validate_usize_conversion(count) {
            Ok(value) => {
                let _ = self.set_gauge(name, value, &[]).await;
            }
            Err(e) => warn!("Failed to record {} {}: {}", name, count, e),
        }
    }

    pub async fn record_http_request(
        &self,
        endpoint: &str,
        method: &str,
        status: &str,
        duration: Duration,
    ) {
        let labels = [("endpoint", endpoint), ("method", method), ("status", status)];
        let _ = self
            .observe_histogram("http_request_duration_seconds", duration.as_secs_f64(), &labels)
            .await;
        let _ = self.increment("http_requests_total", &labels).await;
    }

    pub async fn record_auth_attempt(&self, status: &str) {
        let _ = self
            .increment("auth_attempts_total", &[("status", status)])
            .await;
    }

    pub async fn record_upload_size(&self, size_bytes: u64) {
        let _ = self
            .observe_histogram("upload_size_bytes", size_bytes as f64, &[])
            .await;
    }
}

/// Build the exporter named by `METRICS_BACKEND`
pub fn create_metrics_exporter(exporter_type: &str) -> Result<Arc<dyn MetricsExporter>, MetricsError> {
    match exporter_type.trim().to_lowercase().as_str() {
        "prometheus" => {
            debug!("Initializing Prometheus metrics exporter");
            Ok(Arc::new(PrometheusExporter::new()))
        }
        "none" | "null" | "disabled" => {
            debug!("Metrics disabled, using null exporter");
            Ok(Arc::new(NullExporter))
        }
        other => Err(MetricsError::configuration_error(format!(
            "Unknown metrics backend '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_names_are_swallowed_unless_propagating() {
        let metrics = Metrics::new(Arc::new(PrometheusExporter::new()));
        assert!(metrics.increment("bad-name", &[]).await.is_ok());

        let strict = Metrics::with_error_propagation(Arc::new(PrometheusExporter::new()));
        assert!(matches!(
            strict.increment("bad-name", &[]).await,
            Err(MetricsError::InvalidName { .. })
        ));
        assert!(strict.set_gauge("ok_gauge", f64::NAN, &[]).await.is_err());
    }

    #[test]
    fn unknown_backend_is_a_configuration_error() {
        assert!(create_metrics_exporter("prometheus").is_ok());
        assert!(create_metrics_exporter("Disabled").is_ok());
        assert!(matches!(
            create_metrics_exporter("graphite"),
            Err(MetricsError::ConfigurationError { .. })
        ));
    }
}
