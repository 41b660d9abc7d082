// Configuration validation module for the Transcription API
//
// Every known parameter is declared once in `CONFIG_PARAMS` with its type,
// default and allowed range. Validation walks the registry, collects errors
// and warnings, prints a summary and only then builds the immutable
// configuration handed to the rest of the program.

use std::env;
use std::net::IpAddr;
use std::path::Path;

use log::{error, info, warn};

use crate::config::AppConfig;

/// Configuration parameter types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigType {
    String,
    UnsignedInteger,
    Boolean,
    IpAddress,
    Port,
    /// Path to an executable file
    FilePath,
    Enum(&'static [&'static str]),
}

/// Validation severity levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationLevel {
    /// Must be valid for the application to start
    Critical,
    /// Reported as a warning only
    Warning,
}

/// Configuration parameter definition
#[derive(Debug, Clone)]
pub struct ConfigParam {
    pub name: &'static str,
    pub description: &'static str,
    pub param_type: ConfigType,
    pub default_value: Option<&'static str>,
    pub validation_level: ValidationLevel,
    pub min_value: Option<u64>,
    pub max_value: Option<u64>,
}

impl ConfigParam {
    const fn new(
        name: &'static str,
        description: &'static str,
        param_type: ConfigType,
        default_value: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            description,
            param_type,
            default_value,
            validation_level: ValidationLevel::Critical,
            min_value: None,
            max_value: None,
        }
    }

    const fn range(mut self, min: u64, max: u64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    const fn warning_only(mut self) -> Self {
        self.validation_level = ValidationLevel::Warning;
        self
    }
}

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
const METRICS_BACKENDS: &[&str] = &["prometheus", "none", "disabled"];

/// Centralized configuration parameter registry
pub const CONFIG_PARAMS: &[ConfigParam] = &[
    // Orchestration core
    ConfigParam::new("MCP_WORKERS", "Number of concurrent transcription workers", ConfigType::UnsignedInteger, Some("4"))
        .range(1, 256),
    ConfigParam::new("MCP_TIMEOUT", "Deadline for one provider call in seconds", ConfigType::UnsignedInteger, Some("300"))
        .range(1, 86_400),
    ConfigParam::new("TASK_QUEUE_SIZE", "Maximum outstanding (queued + running) jobs", ConfigType::UnsignedInteger, Some("100"))
        .range(1, 1_000_000),
    ConfigParam::new("TASK_RESULT_TTL", "Seconds a finished task stays queryable", ConfigType::UnsignedInteger, Some("3600"))
        .range(1, 2_592_000),
    ConfigParam::new("RATE_LIMIT_ENABLED", "Enforce the per-client request quota", ConfigType::Boolean, Some("true")),
    ConfigParam::new("RATE_LIMIT_REQUESTS", "Requests allowed per window and client", ConfigType::UnsignedInteger, Some("100"))
        .range(1, 1_000_000),
    ConfigParam::new("RATE_LIMIT_PERIOD", "Rate limit window length in seconds", ConfigType::UnsignedInteger, Some("60"))
        .range(1, 86_400),
    ConfigParam::new("CACHE_ENABLED", "Reuse results for identical audio and parameters", ConfigType::Boolean, Some("true")),
    ConfigParam::new("CACHE_TTL", "Seconds a cached result stays valid", ConfigType::UnsignedInteger, Some("3600"))
        .range(1, 2_592_000),
    ConfigParam::new("REAPER_INTERVAL", "Seconds between eviction passes", ConfigType::UnsignedInteger, Some("60"))
        .range(1, 86_400),
    // HTTP surface
    ConfigParam::new("MCP_HOST", "Host IP address for the API server", ConfigType::IpAddress, Some("0.0.0.0")),
    ConfigParam::new("MCP_PORT", "Port for the API server", ConfigType::Port, Some("8080")),
    ConfigParam::new("HTTP_WORKER_NUMBER", "Number of HTTP workers (0 = use CPU cores)", ConfigType::UnsignedInteger, Some("0"))
        .range(0, 64),
    ConfigParam::new("TEMP_FILE_DIR", "Directory receiving uploaded audio", ConfigType::String, Some("temp_uploads")),
    ConfigParam::new("MAX_FILE_SIZE_MB", "Largest accepted upload in megabytes", ConfigType::UnsignedInteger, Some("512"))
        .range(1, 10_240),
    ConfigParam::new("ENABLE_AUTHORIZATION", "Require a bearer token on API requests", ConfigType::Boolean, Some("false")),
    ConfigParam::new("API_TOKEN", "Bearer token expected when authorization is enabled", ConfigType::String, None),
    // Provider
    ConfigParam::new("PROVIDER_COMMAND", "Recognition command run once per job", ConfigType::FilePath, Some("./bin/asr_transcribe.sh"))
        .warning_only(),
    ConfigParam::new("PROVIDER_ENGINE_MODEL", "Engine model used when a request names none", ConfigType::String, Some("16k_zh")),
    ConfigParam::new("PROVIDER_ARGS", "Extra arguments appended to every provider call", ConfigType::String, None),
    // Logging and metrics
    ConfigParam::new("LOG_LEVEL", "Log level", ConfigType::Enum(LOG_LEVELS), Some("info")),
    ConfigParam::new("ENABLE_METRICS", "Collect and expose metrics", ConfigType::Boolean, Some("true")),
    ConfigParam::new("METRICS_BACKEND", "Metrics exporter", ConfigType::Enum(METRICS_BACKENDS), Some("prometheus")),
];

/// Configuration validation errors with detailed context
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    pub field: String,
    pub value: String,
    pub error_type: ConfigErrorType,
    pub message: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorType {
    InvalidValue,
    InvalidFormat,
    InvalidRange,
    FileNotFound,
    Required,
}

impl ConfigValidationError {
    fn new(
        field: &str,
        value: &str,
        error_type: ConfigErrorType,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
            error_type,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Configuration error in '{}' ({:?}): {} (value: '{}')",
            self.field, self.error_type, self.message, self.value
        )?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " - Suggestion: {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}

pub type ValidationResult<T> = Result<T, ConfigValidationError>;

/// Configuration validation results
#[derive(Debug, Default)]
pub struct ValidationResults {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ConfigValidationError) {
        self.warnings.push(warning);
    }

    fn add(&mut self, level: ValidationLevel, error: ConfigValidationError) {
        match level {
            ValidationLevel::Critical => self.add_error(error),
            ValidationLevel::Warning => self.add_warning(error),
        }
    }

    pub fn print_summary(&self) {
        if !self.errors.is_empty() {
            error!(
                "Configuration validation found {} error(s):",
                self.errors.len()
            );
            for (i, err) in self.errors.iter().enumerate() {
                error!("  {}. {}", i + 1, err);
            }
        }

        if !self.warnings.is_empty() {
            warn!(
                "Configuration validation found {} warning(s):",
                self.warnings.len()
            );
            for (i, warning) in self.warnings.iter().enumerate() {
                warn!("  {}. {}", i + 1, warning);
            }
        }

        if self.is_valid() && self.warnings.is_empty() {
            info!("Configuration validation passed successfully");
        } else if self.is_valid() {
            info!(
                "Configuration validation passed with {} warning(s)",
                self.warnings.len()
            );
        }
    }
}

pub mod validators {
    use super::*;

    pub fn validate_boolean(field: &str, value: &str) -> ValidationResult<bool> {
        match crate::config::parse_flag(value) {
            Some(flag) => Ok(flag),
            None => Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidValue,
                "Invalid boolean value",
                "Use 'true' or 'false'",
            )),
        }
    }

    pub fn validate_unsigned(
        field: &str,
        value: &str,
        min: Option<u64>,
        max: Option<u64>,
    ) -> ValidationResult<u64> {
        let parsed = value.parse::<u64>().map_err(|_| {
            ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidFormat,
                "Invalid unsigned integer format",
                "Use a valid positive integer number",
            )
        })?;

        if let Some(min) = min.filter(|min| parsed < *min) {
            return Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidRange,
                format!("Value {} is below minimum {}", parsed, min),
                format!("Use a value >= {}", min),
            ));
        }
        if let Some(max) = max.filter(|max| parsed > *max) {
            return Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidRange,
                format!("Value {} is above maximum {}", parsed, max),
                format!("Use a value <= {}", max),
            ));
        }
        Ok(parsed)
    }

    pub fn validate_enum(field: &str, value: &str, valid_values: &[&str]) -> ValidationResult<String> {
        let lower = value.to_lowercase();
        if valid_values.contains(&lower.as_str()) {
            Ok(lower)
        } else {
            Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidValue,
                "Value is not one of the allowed options",
                format!("Use one of: {}", valid_values.join(", ")),
            ))
        }
    }

    pub fn validate_ip_address(field: &str, value: &str) -> ValidationResult<IpAddr> {
        value.parse::<IpAddr>().map_err(|_| {
            ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidFormat,
                "Invalid IP address format",
                "Use a valid IPv4 or IPv6 address (e.g., 0.0.0.0 or ::1)",
            )
        })
    }

    pub fn validate_port(field: &str, value: &str) -> ValidationResult<u16> {
        match value.parse::<u16>() {
            Ok(0) | Err(_) => Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::InvalidRange,
                "Port must be between 1 and 65535",
                "Use a valid port number",
            )),
            Ok(port) => Ok(port),
        }
    }

    pub fn validate_file_exists(field: &str, value: &str) -> ValidationResult<String> {
        if Path::new(value).is_file() {
            Ok(value.to_string())
        } else {
            Err(ConfigValidationError::new(
                field,
                value,
                ConfigErrorType::FileNotFound,
                "File does not exist",
                "Check the path, or rely on PATH lookup at run time",
            ))
        }
    }
}

pub fn get_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the environment and build the application configuration
    pub fn validate_and_load() -> Result<AppConfig, ValidationResults> {
        info!("Starting configuration validation...");
        let results = Self::validate_values(get_env_optional);
        results.print_summary();

        if results.is_valid() {
            Ok(AppConfig::from_env())
        } else {
            Err(results)
        }
    }

    /// Validate every registered parameter as returned by `lookup`
    pub fn validate_values<F>(lookup: F) -> ValidationResults
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut results = ValidationResults::new();

        for param in CONFIG_PARAMS {
            let Some(value) = lookup(param.name).or_else(|| param.default_value.map(String::from))
            else {
                continue;
            };
            let value = value.trim();
            if let Err(error) = Self::validate_parameter(param, value) {
                results.add(param.validation_level, error);
            }
        }

        Self::validate_cross_dependencies(&mut results, &lookup);
        results
    }

    fn validate_parameter(param: &ConfigParam, value: &str) -> ValidationResult<()> {
        match param.param_type {
            ConfigType::String => Ok(()),
            ConfigType::UnsignedInteger => {
                validators::validate_unsigned(param.name, value, param.min_value, param.max_value)
                    .map(|_| ())
            }
            ConfigType::Boolean => validators::validate_boolean(param.name, value).map(|_| ()),
            ConfigType::IpAddress => validators::validate_ip_address(param.name, value).map(|_| ()),
            ConfigType::Port => validators::validate_port(param.name, value).map(|_| ()),
            ConfigType::FilePath => validators::validate_file_exists(param.name, value).map(|_| ()),
            ConfigType::Enum(valid_values) => {
                validators::validate_enum(param.name, value, valid_values).map(|_| ())
            }
        }
    }

    fn validate_cross_dependencies<F>(results: &mut ValidationResults, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str, default: bool| {
            lookup(name)
                .and_then(|v| validators::validate_boolean(name, v.trim()).ok())
                .unwrap_or(default)
        };
        let number = |name: &str, default: u64| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        if flag("ENABLE_AUTHORIZATION", false) && lookup("API_TOKEN").is_none() {
            results.add_error(ConfigValidationError::new(
                "API_TOKEN",
                "",
                ConfigErrorType::Required,
                "API token required when authorization is enabled",
                "Set API_TOKEN or disable ENABLE_AUTHORIZATION",
            ));
        }

        let workers = number("MCP_WORKERS", 4);
        let queue_size = number("TASK_QUEUE_SIZE", 100);
        if queue_size < workers {
            results.add_warning(ConfigValidationError::new(
                "TASK_QUEUE_SIZE",
                &queue_size.to_string(),
                ConfigErrorType::InvalidValue,
                format!(
                    "Only {} jobs can be outstanding, so {} of {} workers stay idle",
                    queue_size,
                    workers - queue_size,
                    workers
                ),
                "Set TASK_QUEUE_SIZE to at least MCP_WORKERS",
            ));
        }
    }

    /// Generate a sample configuration file with all parameters and descriptions
    pub fn generate_sample_config() -> String {
        let mut output = String::new();
        output.push_str("# Transcription API Configuration File\n");
        output.push_str("# Environment variables take precedence over these values\n\n");

        for param in CONFIG_PARAMS {
            output.push_str(&format!("# {}\n", param.description));
            let value = match (param.param_type, param.default_value) {
                (_, None) => "\"\"".to_string(),
                (ConfigType::UnsignedInteger | ConfigType::Boolean | ConfigType::Port, Some(v)) => {
                    v.to_string()
                }
                (_, Some(v)) => format!("\"{}\"", v),
            };
            output.push_str(&format!("{} = {}\n\n", param.name, value));
        }
        output
    }
}
