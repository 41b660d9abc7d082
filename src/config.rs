// Transcription API configuration
//
// This module contains the configuration structures and defaults. Every
// structure is built once at startup and handed to the components that need
// it; nothing below `main` reads the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default values for configuration
pub mod defaults {
    // Orchestration core
    pub const MCP_WORKERS: usize = 4;
    pub const MCP_TIMEOUT_SECONDS: u64 = 300;
    pub const TASK_QUEUE_SIZE: usize = 100;
    pub const TASK_RESULT_TTL_SECONDS: u64 = 3600;
    pub const RATE_LIMIT_ENABLED: bool = true;
    pub const RATE_LIMIT_REQUESTS: u32 = 100;
    pub const RATE_LIMIT_PERIOD_SECONDS: u64 = 60;
    pub const CACHE_ENABLED: bool = true;
    pub const CACHE_TTL_SECONDS: u64 = 3600;
    pub const REAPER_INTERVAL_SECONDS: u64 = 60;

    // HTTP surface
    pub const MCP_HOST: &str = "0.0.0.0";
    pub const MCP_PORT: u16 = 8080;
    pub const HTTP_WORKER_NUMBER: usize = 0;
    pub const TEMP_FILE_DIR: &str = "temp_uploads";
    pub const MAX_FILE_SIZE_MB: u64 = 512;
    pub const ENABLE_AUTHORIZATION: bool = false;

    // Provider adapter
    pub const PROVIDER_COMMAND: &str = "./bin/asr_transcribe.sh";
    pub const PROVIDER_ENGINE_MODEL: &str = crate::models::DEFAULT_ENGINE_MODEL;

    // Logging and metrics
    pub const LOG_LEVEL: &str = "info";
    pub const ENABLE_METRICS: bool = true;
    pub const METRICS_BACKEND: &str = "prometheus";
}

/// Parse an environment variable, falling back to `default` when it is
/// missing or malformed
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse a boolean setting: `true/1/yes/on` or `false/0/no/off`, any case
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read a boolean environment variable, keeping `default` when it is
/// missing or not a recognized spelling
pub fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|s| parse_flag(&s))
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Immutable settings of the orchestration core
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    /// Number of concurrent workers (MCP_WORKERS)
    pub workers: usize,
    /// Deadline for a single provider call (MCP_TIMEOUT)
    pub timeout: Duration,
    /// Maximum outstanding (queued + started) jobs (TASK_QUEUE_SIZE)
    pub queue_size: usize,
    /// Retention of finished tasks past their end time (TASK_RESULT_TTL)
    pub task_result_ttl: Duration,
    pub rate_limit_enabled: bool,
    /// Requests allowed per window and scope (RATE_LIMIT_REQUESTS)
    pub rate_limit_requests: u32,
    /// Length of a rate limiting window (RATE_LIMIT_PERIOD)
    pub rate_limit_period: Duration,
    pub cache_enabled: bool,
    /// Lifetime of a cached result (CACHE_TTL)
    pub cache_ttl: Duration,
    /// How often the reaper evicts expired tasks and cache entries
    pub reaper_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: defaults::MCP_WORKERS,
            timeout: Duration::from_secs(defaults::MCP_TIMEOUT_SECONDS),
            queue_size: defaults::TASK_QUEUE_SIZE,
            task_result_ttl: Duration::from_secs(defaults::TASK_RESULT_TTL_SECONDS),
            rate_limit_enabled: defaults::RATE_LIMIT_ENABLED,
            rate_limit_requests: defaults::RATE_LIMIT_REQUESTS,
            rate_limit_period: Duration::from_secs(defaults::RATE_LIMIT_PERIOD_SECONDS),
            cache_enabled: defaults::CACHE_ENABLED,
            cache_ttl: Duration::from_secs(defaults::CACHE_TTL_SECONDS),
            reaper_interval: Duration::from_secs(defaults::REAPER_INTERVAL_SECONDS),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            workers: env_or("MCP_WORKERS", defaults::MCP_WORKERS),
            timeout: Duration::from_secs(env_or("MCP_TIMEOUT", defaults::MCP_TIMEOUT_SECONDS)),
            queue_size: env_or("TASK_QUEUE_SIZE", defaults::TASK_QUEUE_SIZE),
            task_result_ttl: Duration::from_secs(env_or(
                "TASK_RESULT_TTL",
                defaults::TASK_RESULT_TTL_SECONDS,
            )),
            rate_limit_enabled: env_flag("RATE_LIMIT_ENABLED", defaults::RATE_LIMIT_ENABLED),
            rate_limit_requests: env_or("RATE_LIMIT_REQUESTS", defaults::RATE_LIMIT_REQUESTS),
            rate_limit_period: Duration::from_secs(env_or(
                "RATE_LIMIT_PERIOD",
                defaults::RATE_LIMIT_PERIOD_SECONDS,
            )),
            cache_enabled: env_flag("CACHE_ENABLED", defaults::CACHE_ENABLED),
            cache_ttl: Duration::from_secs(env_or("CACHE_TTL", defaults::CACHE_TTL_SECONDS)),
            reaper_interval: Duration::from_secs(env_or(
                "REAPER_INTERVAL",
                defaults::REAPER_INTERVAL_SECONDS,
            )),
        }
    }
}

/// Configuration for the HTTP surface
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of actix workers (0 = one per CPU core)
    pub http_workers: usize,
    /// Directory receiving uploaded audio
    pub temp_dir: String,
    pub max_file_size_bytes: u64,
    pub enable_authorization: bool,
    /// Bearer token required when authorization is enabled
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::MCP_HOST.to_string(),
            port: defaults::MCP_PORT,
            http_workers: defaults::HTTP_WORKER_NUMBER,
            temp_dir: defaults::TEMP_FILE_DIR.to_string(),
            max_file_size_bytes: defaults::MAX_FILE_SIZE_MB * 1024 * 1024,
            enable_authorization: defaults::ENABLE_AUTHORIZATION,
            api_token: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let max_file_size_mb = env_or("MAX_FILE_SIZE_MB", defaults::MAX_FILE_SIZE_MB);
        Self {
            host: env_string_or("MCP_HOST", defaults::MCP_HOST),
            port: env_or("MCP_PORT", defaults::MCP_PORT),
            http_workers: env_or("HTTP_WORKER_NUMBER", defaults::HTTP_WORKER_NUMBER),
            temp_dir: env_string_or("TEMP_FILE_DIR", defaults::TEMP_FILE_DIR),
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            enable_authorization: env_flag("ENABLE_AUTHORIZATION", defaults::ENABLE_AUTHORIZATION),
            api_token: env::var("API_TOKEN").ok().filter(|t| !t.trim().is_empty()),
        }
    }

    /// Effective number of HTTP workers
    pub fn effective_http_workers(&self) -> usize {
        if self.http_workers == 0 {
            num_cpus::get()
        } else {
            self.http_workers
        }
    }

    /// Ensures the upload directory exists
    pub fn ensure_temp_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.temp_dir)
    }
}

/// Configuration for the command-backed transcription provider
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Executable invoked once per job
    pub command_path: String,
    /// Engine model used when the request does not name one
    pub engine_model: String,
    /// Extra arguments appended to every invocation
    pub extra_args: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            command_path: defaults::PROVIDER_COMMAND.to_string(),
            engine_model: defaults::PROVIDER_ENGINE_MODEL.to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self {
            command_path: env_string_or("PROVIDER_COMMAND", defaults::PROVIDER_COMMAND),
            engine_model: env_string_or("PROVIDER_ENGINE_MODEL", defaults::PROVIDER_ENGINE_MODEL),
            extra_args: env::var("PROVIDER_ARGS")
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
        }
    }
}

/// Configuration for metrics collection and export
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Type of metrics exporter ("prometheus", "none")
    pub exporter_type: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            exporter_type: defaults::METRICS_BACKEND.to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn from_env() -> Self {
        let enabled = env_flag("ENABLE_METRICS", defaults::ENABLE_METRICS);
        let exporter_type = if enabled {
            env_string_or("METRICS_BACKEND", defaults::METRICS_BACKEND)
        } else {
            "disabled".to_string()
        };
        Self { exporter_type }
    }
}

/// Every configuration section, loaded together at startup
#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub metrics: MetricsConfig,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            service: ServiceConfig::from_env(),
            server: ServerConfig::from_env(),
            provider: ProviderConfig::from_env(),
            metrics: MetricsConfig::from_env(),
            log_level: env_string_or("LOG_LEVEL", defaults::LOG_LEVEL).to_lowercase(),
        }
    }
}
