//! Transcription service
//!
//! Wires the rate limiter, the result cache, the task registry, the queue and
//! the reaper together and exposes the request intake used by the HTTP layer.
//!
//! Intake order is fixed: rate limiter first, then the cache, then admission.
//! A rejected request never creates a task.

use log::{debug, info};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{fingerprint, ResultCache};
use crate::config::ServiceConfig;
use crate::error::CoreError;
use crate::file_utils::cleanup_folder;
use crate::health::{HealthReporter, HealthSnapshot};
use crate::metrics::Metrics;
use crate::models::{AudioInput, Task, TaskListResponse, TranscriptionParams};
use crate::provider::TranscriptionProvider;
use crate::queue_manager::{JobRequest, QueueManager};
use crate::rate_limiter::RateLimiter;
use crate::reaper::spawn_reaper;
use crate::task_registry::TaskRegistry;

/// A request the service took responsibility for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub task_id: String,
    /// The task was completed from the cache without reaching a worker
    pub cached: bool,
}

pub struct TranscriptionService {
    config: ServiceConfig,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResultCache>,
    registry: Arc<TaskRegistry>,
    queue: Arc<QueueManager>,
    health: HealthReporter,
    metrics: Metrics,
    shutdown: CancellationToken,
    reaper: StdMutex<Option<JoinHandle<()>>>,
}

impl TranscriptionService {
    /// Build every component and start the workers and the reaper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: ServiceConfig,
        provider: Arc<dyn TranscriptionProvider>,
        metrics: Metrics,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config));
        let cache = Arc::new(ResultCache::from_config(&config));
        let registry = Arc::new(TaskRegistry::new());
        let queue = Arc::new(QueueManager::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&cache),
            provider,
            metrics.clone(),
        ));
        let health = HealthReporter::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&cache),
            Arc::clone(&limiter),
        );

        let shutdown = CancellationToken::new();
        let reaper = spawn_reaper(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&limiter),
            config.reaper_interval,
            config.task_result_ttl,
            shutdown.child_token(),
        );

        Self {
            config,
            limiter,
            cache,
            registry,
            queue,
            health,
            metrics,
            shutdown,
            reaper: StdMutex::new(Some(reaper)),
        }
    }

    /// Accept a transcription request for `scope` or reject it.
    ///
    /// On a cache hit the task is created already completed. The uploaded
    /// audio folder is removed whenever no worker will read it.
    pub async fn intake(
        &self,
        scope: &str,
        audio: AudioInput,
        params: TranscriptionParams,
    ) -> Result<Accepted, CoreError> {
        let result = self.admit(scope, audio.clone(), params).await;

        let outcome = match &result {
            Ok(Accepted { cached: true, .. }) => "cached",
            Ok(Accepted { cached: false, .. }) => "accepted",
            Err(e) => e.reason(),
        };
        self.metrics.record_submission(outcome).await;

        let handed_to_worker = matches!(result, Ok(Accepted { cached: false, .. }));
        if !handed_to_worker {
            if let Some(folder) = &audio.folder {
                cleanup_folder(folder);
            }
        }
        result
    }

    async fn admit(
        &self,
        scope: &str,
        audio: AudioInput,
        params: TranscriptionParams,
    ) -> Result<Accepted, CoreError> {
        if self.queue.is_closed() {
            return Err(CoreError::ShuttingDown);
        }

        if !self.limiter.allow(scope) {
            info!("Request from scope {} rejected: rate limited", scope);
            return Err(CoreError::RateLimited(scope.to_string()));
        }

        let key = fingerprint(&audio.digest, &params);
        if self.cache.is_enabled() {
            let cached = self.cache.get(&key);
            self.metrics.record_cache_lookup(cached.is_some()).await;
            if let Some(segments) = cached {
                let task_id = self.registry.create_completed(segments);
                debug!("Task {} served from cache", task_id);
                return Ok(Accepted {
                    task_id,
                    cached: true,
                });
            }
        }

        let task_id = self.queue.submit(JobRequest {
            audio,
            params,
            fingerprint: key,
        })?;
        self.metrics.set_queue_depth(self.queue.queue_depth()).await;
        Ok(Accepted {
            task_id,
            cached: false,
        })
    }

    pub fn status(&self, task_id: &str) -> Result<Task, CoreError> {
        self.registry.get(task_id)
    }

    /// Active tasks plus the concurrency ceiling
    pub fn list_tasks(&self) -> TaskListResponse {
        let tasks = self.registry.list_active();
        TaskListResponse {
            active_tasks: tasks.len(),
            max_tasks: self.queue.worker_count(),
            tasks,
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.queue
    }

    /// Stop the reaper, close admission and wait for queued jobs to finish
    pub async fn shutdown(&self) {
        info!("Shutting down transcription service");
        self.shutdown.cancel();
        self.queue.drain().await;

        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(reaper) = reaper {
            let _ = reaper.await;
        }
        info!("Transcription service stopped");
    }
}
