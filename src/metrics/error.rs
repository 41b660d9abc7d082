//! Error types for the metrics system
//!
//! Metric failures never abort a transcription job; the facade logs them and
//! moves on. The exporters still report precise errors so tests and the
//! `/metrics` endpoint can tell what went wrong.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
    /// Invalid metric name (e.g., empty, invalid characters, wrong format)
    #[error("Invalid metric name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Invalid label name or value
    #[error("Invalid label '{label}': {reason}")]
    InvalidLabel { label: String, reason: String },

    /// Metric registration failed (duplicate or conflicting registration)
    #[error("Failed to register metric '{name}': {reason}")]
    RegistrationFailed { name: String, reason: String },

    #[error("Failed to export metrics: {reason}")]
    ExportFailed { reason: String },

    /// Value validation error (e.g., NaN, precision loss)
    #[error("Invalid value '{value}': {reason}")]
    InvalidValue { value: String, reason: String },

    #[error("Configuration error: {reason}")]
    ConfigurationError { reason: String },

    /// Too many metric families registered
    #[error("Resource limit exceeded: {reason}")]
    ResourceLimitExceeded { reason: String },
}

impl MetricsError {
    pub fn invalid_name<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_label<L: Into<String>, R: Into<String>>(label: L, reason: R) -> Self {
        Self::InvalidLabel {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn registration_failed<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::RegistrationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn export_failed<R: Into<String>>(reason: R) -> Self {
        Self::ExportFailed {
            reason: reason.into(),
        }
    }

    pub fn invalid_value<V: fmt::Display, R: Into<String>>(value: V, reason: R) -> Self {
        Self::InvalidValue {
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn configuration_error<R: Into<String>>(reason: R) -> Self {
        Self::ConfigurationError {
            reason: reason.into(),
        }
    }

    pub fn resource_limit_exceeded<R: Into<String>>(reason: R) -> Self {
        Self::ResourceLimitExceeded {
            reason: reason.into(),
        }
    }
}

/// Validation functions for metrics names and labels
pub mod validation {
    use super::MetricsError;
    use std::collections::HashSet;

    /// Label names Prometheus reserves for itself
    const PROMETHEUS_RESERVED_LABELS: &[&str] = &["__name__", "__value__"];

    const MAX_NAME_LENGTH: usize = 512;
    const MAX_LABEL_KEY_LENGTH: usize = 256;
    const MAX_LABEL_VALUE_LENGTH: usize = 1024;
    const MAX_LABELS_PER_METRIC: usize = 32;

    /// Largest integer an f64 holds exactly
    const MAX_EXACT_F64: f64 = (1u64 << 53) as f64;

    fn starts_like_identifier(s: &str) -> bool {
        s.chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
    }

    /// Prometheus metric names start with a letter or underscore and contain
    /// only letters, digits, underscores and colons
    pub fn validate_metric_name(name: &str) -> Result<(), MetricsError> {
        if name.is_empty() {
            return Err(MetricsError::invalid_name(name, "Metric name cannot be empty"));
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(MetricsError::invalid_name(
                name,
                format!("Metric name too long (max {} characters)", MAX_NAME_LENGTH),
            ));
        }
        if !starts_like_identifier(name) {
            return Err(MetricsError::invalid_name(
                name,
                "Metric name must start with a letter or underscore",
            ));
        }
        if let Some((i, ch)) = name
            .chars()
            .enumerate()
            .find(|(_, ch)| !ch.is_ascii_alphanumeric() && *ch != '_' && *ch != ':')
        {
            return Err(MetricsError::invalid_name(
                name,
                format!("Invalid character '{}' at position {}", ch, i),
            ));
        }
        Ok(())
    }

    pub fn validate_label_key(key: &str) -> Result<(), MetricsError> {
        if key.is_empty() {
            return Err(MetricsError::invalid_label(key, "Label key cannot be empty"));
        }
        if key.len() > MAX_LABEL_KEY_LENGTH {
            return Err(MetricsError::invalid_label(
                key,
                format!("Label key too long (max {} characters)", MAX_LABEL_KEY_LENGTH),
            ));
        }
        if PROMETHEUS_RESERVED_LABELS.contains(&key) {
            return Err(MetricsError::invalid_label(
                key,
                "Label key is reserved by Prometheus",
            ));
        }
        if !starts_like_identifier(key) {
            return Err(MetricsError::invalid_label(
                key,
                "Label key must start with a letter or underscore",
            ));
        }
        if let Some((i, ch)) = key
            .chars()
            .enumerate()
            .find(|(_, ch)| !ch.is_ascii_alphanumeric() && *ch != '_')
        {
            return Err(MetricsError::invalid_label(
                key,
                format!("Invalid character '{}' at position {}", ch, i),
            ));
        }
        Ok(())
    }

    pub fn validate_label_value(value: &str) -> Result<(), MetricsError> {
        if value.len() > MAX_LABEL_VALUE_LENGTH {
            return Err(MetricsError::invalid_label(
                value,
                format!(
                    "Label value too long (max {} characters)",
                    MAX_LABEL_VALUE_LENGTH
                ),
            ));
        }
        if let Some(i) = value.chars().position(|ch| ch.is_control()) {
            return Err(MetricsError::invalid_label(
                value,
                format!("Invalid control character at position {}", i),
            ));
        }
        Ok(())
    }

    pub fn validate_labels(labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        if labels.len() > MAX_LABELS_PER_METRIC {
            return Err(MetricsError::invalid_label(
                "",
                format!("Too many labels (max {} allowed)", MAX_LABELS_PER_METRIC),
            ));
        }

        let mut seen_keys = HashSet::new();
        for (key, value) in labels {
            validate_label_key(key)?;
            validate_label_value(value)?;
            if !seen_keys.insert(key) {
                return Err(MetricsError::invalid_label(*key, "Duplicate label key"));
            }
        }
        Ok(())
    }

    pub fn validate_numeric_value(value: f64) -> Result<(), MetricsError> {
        if !value.is_finite() {
            return Err(MetricsError::invalid_value(
                value,
                "Value must be finite (not NaN or infinite)",
            ));
        }
        if value.abs() > MAX_EXACT_F64 {
            return Err(MetricsError::invalid_value(
                value,
                "Value too large, may lose precision in f64",
            ));
        }
        Ok(())
    }

    /// Convert a count to a gauge value without silent precision loss
    pub fn validate_usize_conversion(value: usize) -> Result<f64, MetricsError> {
        let as_float = value as f64;
        if as_float > MAX_EXACT_F64 {
            return Err(MetricsError::invalid_value(
                value,
                "Value too large for accurate f64 conversion",
            ));
        }
        Ok(as_float)
    }
}
