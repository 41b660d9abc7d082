//! Health reporting
//!
//! A read-only view over the registry, the queue, the cache and the rate
//! limiter. Building a snapshot never mutates any of them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::cache::ResultCache;
use crate::queue_manager::QueueManager;
use crate::rate_limiter::RateLimiter;
use crate::task_registry::TaskRegistry;

/// Overall service state
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// The queue is closed and only draining
    ShuttingDown,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    /// Tasks queued or started
    pub active_tasks: usize,
    /// Concurrency ceiling (number of workers)
    pub max_tasks: usize,
    /// Jobs admitted but not yet picked up by a worker
    pub queue_depth: usize,
    pub cache_hit_rate: f64,
    /// Requests per second over the live rate windows
    pub request_rate: f64,
}

pub struct HealthReporter {
    registry: Arc<TaskRegistry>,
    queue: Arc<QueueManager>,
    cache: Arc<ResultCache>,
    limiter: Arc<RateLimiter>,
}

impl HealthReporter {
    pub fn new(
        registry: Arc<TaskRegistry>,
        queue: Arc<QueueManager>,
        cache: Arc<ResultCache>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            registry,
            queue,
            cache,
            limiter,
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let status = if self.queue.is_closed() {
            HealthStatus::ShuttingDown
        } else {
            HealthStatus::Healthy
        };
        HealthSnapshot {
            status,
            timestamp: Utc::now(),
            active_tasks: self.registry.active_count(),
            max_tasks: self.queue.worker_count(),
            queue_depth: self.queue.queue_depth(),
            cache_hit_rate: self.cache.hit_rate(),
            request_rate: self.limiter.request_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::metrics::Metrics;
    use crate::models::{AudioInput, Segment, TranscriptionParams};
    use crate::provider::{ProviderError, TranscriptionProvider};
    use async_trait::async_trait;
    use std::time::Duration;

    struct IdleProvider;

    #[async_trait]
    impl TranscriptionProvider for IdleProvider {
        async fn transcribe(
            &self,
            _audio: &AudioInput,
            _params: &TranscriptionParams,
            _deadline: Duration,
        ) -> Result<Vec<Segment>, ProviderError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn snapshot_reflects_components_without_changing_them() {
        let config = ServiceConfig {
            workers: 3,
            ..ServiceConfig::default()
        };
        let registry = Arc::new(TaskRegistry::new());
        let cache = Arc::new(ResultCache::from_config(&config));
        let limiter = Arc::new(RateLimiter::new(true, 10, Duration::from_secs(10)));
        let queue = Arc::new(QueueManager::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::new(IdleProvider),
            Metrics::disabled(),
        ));
        let reporter = HealthReporter::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&cache),
            Arc::clone(&limiter),
        );

        registry.create();
        limiter.allow("client");
        cache.put("f", Vec::new());
        cache.get("f");

        let first = reporter.snapshot();
        let second = reporter.snapshot();
        assert_eq!(first.status, HealthStatus::Healthy);
        assert_eq!(first.active_tasks, 1);
        assert_eq!(first.max_tasks, 3);
        assert_eq!(first.queue_depth, 0);
        assert_eq!(first.cache_hit_rate, 1.0);
        assert!(first.request_rate > 0.0);
        assert_eq!(first.cache_hit_rate, second.cache_hit_rate);
        assert_eq!(first.active_tasks, second.active_tasks);

        queue.close();
        assert_eq!(reporter.snapshot().status, HealthStatus::ShuttingDown);
    }
}
