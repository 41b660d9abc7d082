//! Prometheus exporter
//!
//! Metric families are created lazily on first use and kept in one `DashMap`
//! per metric type. Label names are sorted before a family is created so the
//! order in which callers pass labels does not matter.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::metrics::error::{validation, MetricsError};
use crate::metrics::metrics::MetricsExporter;

/// Default ceiling on the number of metric families
const DEFAULT_MAX_METRICS: usize = 1000;

pub struct PrometheusExporter {
    registry: Registry,
    counters: DashMap<String, CounterVec>,
    gauges: DashMap<String, GaugeVec>,
    histograms: DashMap<String, HistogramVec>,
    max_metrics: usize,
    namespace: Option<String>,
    metric_count: AtomicUsize,
}

impl Default for PrometheusExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusExporter {
    pub fn new() -> Self {
        Self::with_limits(None, DEFAULT_MAX_METRICS)
    }

    /// Prefix every metric name with `namespace_`
    pub fn with_namespace(namespace: &str) -> Result<Self, MetricsError> {
        validation::validate_metric_name(namespace).map_err(|e| {
            MetricsError::configuration_error(format!(
                "Invalid metrics namespace '{}': {}",
                namespace, e
            ))
        })?;
        Ok(Self::with_limits(
            Some(namespace.to_string()),
            DEFAULT_MAX_METRICS,
        ))
    }

    fn with_limits(namespace: Option<String>, max_metrics: usize) -> Self {
        let capacity = (max_metrics / 3).max(16);
        Self {
            registry: Registry::new(),
            counters: DashMap::with_capacity(capacity),
            gauges: DashMap::with_capacity(capacity),
            histograms: DashMap::with_capacity(capacity),
            max_metrics,
            namespace,
            metric_count: AtomicUsize::new(0),
        }
    }

    fn apply_namespace(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}_{}", ns, name),
            None => name.to_string(),
        }
    }

    /// "jobs_completed_total" -> "Jobs Completed Total - counter"
    fn generate_help_text(name: &str, metric_type: &str) -> String {
        let readable_name = name
            .split('_')
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    None => String::new(),
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!("{} - {}", readable_name, metric_type)
    }

    fn check_and_reserve_metric_slot(&self) -> Result<(), MetricsError> {
        let mut current = self.metric_count.load(Ordering::Relaxed);
        loop {
            if current >= self.max_metrics {
                return Err(MetricsError::resource_limit_exceeded(format!(
                    "Maximum number of metrics ({}) exceeded",
                    self.max_metrics
                )));
            }
            match self.metric_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(v) => current = v,
            }
        }
    }

    fn release_metric_slot(&self) {
        self.metric_count.fetch_sub(1, Ordering::SeqCst);
    }

    fn get_histogram_buckets(name: &str) -> Vec<f64> {
        if name.contains("duration") || name.contains("seconds") {
            // Provider calls run from sub-second cache hits up to the job deadline
            vec![
                0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
            ]
        } else if name.contains("size") || name.contains("bytes") {
            vec![
                65536.0, 262144.0, 1048576.0, 4194304.0, 16777216.0, 67108864.0, 268435456.0,
            ]
        } else {
            prometheus::DEFAULT_BUCKETS.to_vec()
        }
    }

    fn check_metric_type_conflict(&self, full_name: &str, metric_type: &str) -> Result<(), MetricsError> {
        let existing = [
            (self.counters.contains_key(full_name), "counter"),
            (self.gauges.contains_key(full_name), "gauge"),
            (self.histograms.contains_key(full_name), "histogram"),
        ];
        for (exists, existing_type) in existing {
            if exists && existing_type != metric_type {
                return Err(MetricsError::registration_failed(
                    full_name,
                    format!(
                        "Metric already exists as {} but was used as {}",
                        existing_type, metric_type
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Register a new collector, rolling back the slot reservation on failure
    fn register<C>(&self, name: &str, collector: Result<C, prometheus::Error>) -> Result<C, MetricsError>
    where
        C: prometheus::core::Collector + Clone + 'static,
    {
        self.check_and_reserve_metric_slot()?;
        let collector = collector.map_err(|err| {
            self.release_metric_slot();
            MetricsError::registration_failed(name, format!("Failed to create metric: {}", err))
        })?;
        if let Err(err) = self.registry.register(Box::new(collector.clone())) {
            self.release_metric_slot();
            return Err(MetricsError::registration_failed(
                name,
                format!("Failed to register metric: {}", err),
            ));
        }
        Ok(collector)
    }

    fn get_or_create_counter(&self, name: &str, label_names: &[&str]) -> Result<CounterVec, MetricsError> {
        let full_name = self.apply_namespace(name);
        self.check_metric_type_conflict(&full_name, "counter")?;
        if let Some(counter) = self.counters.get(&full_name) {
            return Ok(counter.clone());
        }
        match self.counters.entry(full_name.clone()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let help = Self::generate_help_text(name, "counter");
                let counter = self.register(
                    &full_name,
                    CounterVec::new(Opts::new(&full_name, help), label_names),
                )?;
                Ok(e.insert(counter).clone())
            }
        }
    }

    fn get_or_create_gauge(&self, name: &str, label_names: &[&str]) -> Result<GaugeVec, MetricsError> {
        let full_name = self.apply_namespace(name);
        self.check_metric_type_conflict(&full_name, "gauge")?;
        if let Some(gauge) = self.gauges.get(&full_name) {
            return Ok(gauge.clone());
        }
        match self.gauges.entry(full_name.clone()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let help = Self::generate_help_text(name, "gauge");
                let gauge = self.register(
                    &full_name,
                    GaugeVec::new(Opts::new(&full_name, help), label_names),
                )?;
                Ok(e.insert(gauge).clone())
            }
        }
    }

    fn get_or_create_histogram(
        &self,
        name: &str,
        label_names: &[&str],
    ) -> Result<HistogramVec, MetricsError> {
        let full_name = self.apply_namespace(name);
        self.check_metric_type_conflict(&full_name, "histogram")?;
        if let Some(histogram) = self.histograms.get(&full_name) {
            return Ok(histogram.clone());
        }
        match self.histograms.entry(full_name.clone()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let help = Self::generate_help_text(name, "histogram");
                let opts = HistogramOpts::new(&full_name, help)
                    .buckets(Self::get_histogram_buckets(name));
                let histogram = self.register(&full_name, HistogramVec::new(opts, label_names))?;
                Ok(e.insert(histogram).clone())
            }
        }
    }

    /// Sort labels by name so every call site maps to the same family
    fn canonical_labels<'a>(
        labels: &'a [(&'a str, &'a str)],
    ) -> Result<(Vec<&'a str>, Vec<&'a str>), MetricsError> {
        for (_, value) in labels {
            if value.contains('"') || value.contains('\\') {
                return Err(MetricsError::invalid_label(
                    *value,
                    "Label value contains quotes or backslashes",
                ));
            }
        }
        let unique: HashSet<&str> = labels.iter().map(|(k, _)| *k).collect();
        if unique.len() != labels.len() {
            return Err(MetricsError::invalid_label(
                "labels",
                "Duplicate label names detected",
            ));
        }

        let values: HashMap<&str, &str> = labels.iter().copied().collect();
        let mut names: Vec<&str> = labels.iter().map(|(k, _)| *k).collect();
        names.sort_unstable();
        let ordered_values = names.iter().map(|name| values[name]).collect();
        Ok((names, ordered_values))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metric_count(&self) -> usize {
        self.metric_count.load(Ordering::SeqCst)
    }
}

fn label_mismatch(name: &str, err: prometheus::Error) -> MetricsError {
    MetricsError::invalid_label(name, format!("Label set does not match metric: {}", err))
}

#[async_trait]
impl MetricsExporter for PrometheusExporter {
    async fn increment(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        validation::validate_metric_name(name)?;
        validation::validate_labels(labels)?;
        let (names, values) = Self::canonical_labels(labels)?;
        let counter = self.get_or_create_counter(name, &names)?;
        counter
            .get_metric_with_label_values(&values)
            .map_err(|e| label_mismatch(name, e))?
            .inc();
        debug!("Incremented counter {} with labels {:?}", name, labels);
        Ok(())
    }

    async fn set_gauge(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        validation::validate_metric_name(name)?;
        validation::validate_labels(labels)?;
        validation::validate_numeric_value(value)?;
        let (names, values) = Self::canonical_labels(labels)?;
        let gauge = self.get_or_create_gauge(name, &names)?;
        gauge
            .get_metric_with_label_values(&values)
            .map_err(|e| label_mismatch(name, e))?
            .set(value);
        Ok(())
    }

    async fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        validation::validate_metric_name(name)?;
        validation::validate_labels(labels)?;
        validation::validate_numeric_value(value)?;
        let (names, values) = Self::canonical_labels(labels)?;
        let histogram = self.get_or_create_histogram(name, &names)?;
        histogram
            .get_metric_with_label_values(&values)
            .map_err(|e| label_mismatch(name, e))?
            .observe(value);
        Ok(())
    }

    async fn export(&self) -> Result<Vec<u8>, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::export_failed(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn label_order_does_not_create_new_families() {
        let exporter = PrometheusExporter::new();
        exporter
            .increment("jobs_completed_total", &[("status", "completed"), ("reason", "none")])
            .await
            .unwrap();
        exporter
            .increment("jobs_completed_total", &[("reason", "none"), ("status", "completed")])
            .await
            .unwrap();
        assert_eq!(exporter.metric_count(), 1);

        let text = String::from_utf8(exporter.export().await.unwrap()).unwrap();
        assert!(text.contains("jobs_completed_total{reason=\"none\",status=\"completed\"} 2"));
    }

    #[tokio::test]
    async fn type_conflicts_are_rejected() {
        let exporter = PrometheusExporter::new();
        exporter.set_gauge("queue_depth", 3.0, &[]).await.unwrap();
        let err = exporter.increment("queue_depth", &[]).await.unwrap_err();
        assert!(matches!(err, MetricsError::RegistrationFailed { .. }));
    }

    #[tokio::test]
    async fn mismatched_label_sets_are_errors_not_panics() {
        let exporter = PrometheusExporter::new();
        exporter
            .increment("submissions_total", &[("outcome", "accepted")])
            .await
            .unwrap();
        let err = exporter.increment("submissions_total", &[]).await.unwrap_err();
        assert!(matches!(err, MetricsError::InvalidLabel { .. }));
    }

    #[tokio::test]
    async fn namespace_prefixes_metric_names() {
        let exporter = PrometheusExporter::with_namespace("transcribe").unwrap();
        exporter.set_gauge("active_workers", 2.0, &[]).await.unwrap();
        let text = String::from_utf8(exporter.export().await.unwrap()).unwrap();
        assert!(text.contains("transcribe_active_workers 2"));
        assert!(PrometheusExporter::with_namespace("9bad").is_err());
    }

    #[test]
    fn help_text_is_human_readable() {
        assert_eq!(
            PrometheusExporter::generate_help_text("cache_lookups_total", "counter"),
            "Cache Lookups Total - counter"
        );
    }
}
