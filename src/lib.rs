// Transcription API Library
//
// This crate provides an HTTP API in front of an external speech
// recognition provider. Requests pass a per-client rate limiter and a
// result cache before a bounded queue admits them for a fixed pool of
// workers.

pub mod cache;
pub mod config;
pub mod config_loader;
pub mod config_validator;
pub mod error;
pub mod file_utils;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod queue_manager;
pub mod rate_limiter;
pub mod reaper;
pub mod result_parser;
pub mod service;
pub mod task_registry;

#[cfg(test)]
mod tests;

// Re-export common types for easier access
pub use config::{AppConfig, MetricsConfig, ProviderConfig, ServerConfig, ServiceConfig};
pub use error::{CoreError, HandlerError};
pub use handlers::{AppState, Authentication};
pub use metrics::{create_metrics_exporter, Metrics};
pub use models::{Segment, Task, TaskStatus, TranscriptionParams};
pub use provider::{CommandProvider, ProviderError, TranscriptionProvider};
pub use service::{Accepted, TranscriptionService};
