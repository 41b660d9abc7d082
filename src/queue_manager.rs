//! Queue Manager for the Transcription API
//!
//! Admission control and the worker pool. `submit` decides synchronously
//! whether a job fits under the outstanding-job ceiling; admitted jobs go
//! through a bounded FIFO channel to exactly `workers` background tasks. Each
//! worker runs one provider call at a time under the configured deadline and
//! writes the outcome back to the task registry.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::cache::ResultCache;
use crate::config::ServiceConfig;
use crate::error::CoreError;
use crate::file_utils::cleanup_folder;
use crate::metrics::Metrics;
use crate::models::{AudioInput, FailureKind, TaskFailure, TaskStatus, TranscriptionParams};
use crate::provider::{ProviderError, TranscriptionProvider};
use crate::task_registry::TaskRegistry;

/// Work handed to the admission controller
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub audio: AudioInput,
    pub params: TranscriptionParams,
    /// Cache key the result is stored under
    pub fingerprint: String,
}

/// An admitted job travelling through the queue
#[derive(Debug)]
struct QueuedJob {
    task_id: String,
    request: JobRequest,
}

/// Outstanding-job accounting (queued + started)
#[derive(Debug)]
struct Slots {
    capacity: usize,
    outstanding: AtomicUsize,
}

impl Slots {
    fn try_reserve(&self) -> bool {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.capacity).then_some(current + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        // Never wraps: every release pairs with a successful reservation
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

/// State shared by every worker
struct WorkerContext {
    registry: Arc<TaskRegistry>,
    cache: Arc<ResultCache>,
    provider: Arc<dyn TranscriptionProvider>,
    metrics: Metrics,
    deadline: Duration,
    slots: Slots,
    /// Jobs sent to the channel and not yet taken by a worker
    queued: AtomicUsize,
    started: AtomicUsize,
}

pub struct QueueManager {
    ctx: Arc<WorkerContext>,
    job_tx: StdMutex<Option<mpsc::Sender<QueuedJob>>>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl QueueManager {
    /// Create the queue and start `config.workers` workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &ServiceConfig,
        registry: Arc<TaskRegistry>,
        cache: Arc<ResultCache>,
        provider: Arc<dyn TranscriptionProvider>,
        metrics: Metrics,
    ) -> Self {
        let capacity = config.queue_size.max(1);
        let worker_count = config.workers.max(1);
        let (job_tx, job_rx) = mpsc::channel(capacity);

        let ctx = Arc::new(WorkerContext {
            registry,
            cache,
            provider,
            metrics,
            deadline: config.timeout,
            slots: Slots {
                capacity,
                outstanding: AtomicUsize::new(0),
            },
            queued: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
        });

        // One receiver shared by all workers keeps dequeue order equal to
        // admission order
        let job_rx = Arc::new(Mutex::new(job_rx));
        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(Self::run_worker(
                    worker_id,
                    Arc::clone(&job_rx),
                    Arc::clone(&ctx),
                ))
            })
            .collect();

        info!(
            "Queue manager started with {} workers, capacity {}, deadline {}s",
            worker_count,
            capacity,
            config.timeout.as_secs()
        );

        Self {
            ctx,
            job_tx: StdMutex::new(Some(job_tx)),
            workers: StdMutex::new(workers),
            worker_count,
        }
    }

    /// Admit a job or reject it immediately.
    ///
    /// Returns the id of the new `queued` task. A rejected job leaves no task
    /// behind.
    pub fn submit(&self, request: JobRequest) -> Result<String, CoreError> {
        let job_tx = lock(&self.job_tx);
        let Some(sender) = job_tx.as_ref() else {
            return Err(CoreError::ShuttingDown);
        };

        if !self.ctx.slots.try_reserve() {
            debug!(
                "Rejecting job: {} outstanding jobs",
                self.ctx.slots.outstanding()
            );
            return Err(CoreError::QueueFull {
                capacity: self.ctx.slots.capacity,
            });
        }

        let task_id = self.ctx.registry.create();
        let job = QueuedJob {
            task_id: task_id.clone(),
            request,
        };

        // Counted before the send so a worker never takes a job it cannot uncount
        self.ctx.queued.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = sender.try_send(job) {
            // Roll the admission back so the ceiling and the registry agree
            self.ctx.queued.fetch_sub(1, Ordering::AcqRel);
            self.ctx.registry.discard_queued(&task_id);
            self.ctx.slots.release();
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Job channel full while a slot was free");
                    CoreError::QueueFull {
                        capacity: self.ctx.slots.capacity,
                    }
                }
                mpsc::error::TrySendError::Closed(_) => CoreError::ShuttingDown,
            });
        }

        debug!("Task {} queued", task_id);
        Ok(task_id)
    }

    /// Jobs admitted but not yet picked up by a worker
    pub fn queue_depth(&self) -> usize {
        self.ctx.queued.load(Ordering::Acquire)
    }

    /// Jobs queued or running
    pub fn outstanding(&self) -> usize {
        self.ctx.slots.outstanding()
    }

    /// Jobs currently running a provider call
    pub fn started_count(&self) -> usize {
        self.ctx.started.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.ctx.slots.capacity
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.job_tx).is_none()
    }

    /// Stop admitting jobs. Workers keep draining what is already queued.
    pub fn close(&self) {
        if lock(&self.job_tx).take().is_some() {
            info!("Job queue closed, draining {} queued jobs", self.queue_depth());
        }
    }

    /// Close the queue and wait until every worker has exited
    pub async fn drain(&self) {
        self.close();
        let workers: Vec<JoinHandle<()>> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker terminated abnormally: {}", e);
            }
        }
    }

    async fn run_worker(
        worker_id: usize,
        job_rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
        ctx: Arc<WorkerContext>,
    ) {
        debug!("Worker {} started", worker_id);
        loop {
            let job = {
                let mut job_rx = job_rx.lock().await;
                job_rx.recv().await
            };
            let Some(job) = job else { break };
            ctx.process(worker_id, job).await;
        }
        debug!("Worker {} stopped", worker_id);
    }
}

impl WorkerContext {
    async fn process(&self, worker_id: usize, job: QueuedJob) {
        let QueuedJob { task_id, request } = job;
        self.queued.fetch_sub(1, Ordering::AcqRel);

        let running = self.started.fetch_add(1, Ordering::AcqRel) + 1;
        if let Err(e) = self.registry.mark_started(&task_id) {
            error!("Worker {} could not start task {}: {}", worker_id, task_id, e);
            self.started.fetch_sub(1, Ordering::AcqRel);
            self.finish_job(&request, None).await;
            return;
        }
        self.metrics.set_active_workers(running).await;
        info!("Worker {} processing task {}", worker_id, task_id);

        let started_at = Instant::now();
        let status = self.run_provider(&task_id, &request).await;
        let elapsed = started_at.elapsed();

        // The slot goes first so outstanding never drops below started
        self.finish_job(&request, status.map(|s| (s, elapsed))).await;
        let running = self.started.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        self.metrics.set_active_workers(running).await;
    }

    /// Call the provider under the deadline and record the terminal state
    async fn run_provider(&self, task_id: &str, request: &JobRequest) -> Option<TaskStatus> {
        let provider = Arc::clone(&self.provider);
        let audio = request.audio.clone();
        let params = request.params.clone();
        let deadline = self.deadline;
        let mut handle =
            tokio::spawn(async move { provider.transcribe(&audio, &params, deadline).await });

        let recorded = match timeout(deadline, &mut handle).await {
            Ok(Ok(Ok(segments))) => {
                info!("Task {} completed with {} segments", task_id, segments.len());
                self.cache.put(&request.fingerprint, segments.clone());
                self.registry
                    .mark_completed(task_id, segments)
                    .map(|_| TaskStatus::Completed)
            }
            Ok(Ok(Err(e))) => {
                let failure = failure_for(&e);
                if e.is_transient() {
                    warn!("Task {} failed: {}", task_id, failure.message);
                } else {
                    error!("Task {} rejected by provider: {}", task_id, failure.message);
                }
                self.registry
                    .mark_failed(task_id, failure)
                    .map(|_| TaskStatus::Failed)
            }
            Ok(Err(join_error)) => {
                error!("Provider task for {} crashed: {}", task_id, join_error);
                self.registry
                    .mark_failed(
                        task_id,
                        TaskFailure::new(FailureKind::Internal, join_error.to_string()),
                    )
                    .map(|_| TaskStatus::Failed)
            }
            Err(_) => {
                // A result arriving after this point is discarded with the task
                handle.abort();
                warn!(
                    "Task {} timed out after {}s",
                    task_id,
                    deadline.as_secs_f64()
                );
                self.registry
                    .mark_timeout(task_id, deadline)
                    .map(|_| TaskStatus::Timeout)
            }
        };

        recorded
            .map_err(|e| error!("Could not record outcome of task {}: {}", task_id, e))
            .ok()
    }

    /// Release the slot and the uploaded audio once a job is over
    async fn finish_job(&self, request: &JobRequest, outcome: Option<(TaskStatus, Duration)>) {
        self.slots.release();
        if let Some(folder) = &request.audio.folder {
            cleanup_folder(folder);
        }
        if let Some((status, elapsed)) = outcome {
            self.metrics.record_job_completed(status, elapsed).await;
        }
        self.metrics
            .set_queue_depth(self.queued.load(Ordering::Acquire))
            .await;
    }
}

/// Failure recorded on a task whose provider call returned an error
fn failure_for(error: &ProviderError) -> TaskFailure {
    let message = match error {
        ProviderError::Transient(msg) => CoreError::ProviderTransient(msg.clone()).to_string(),
        ProviderError::Permanent(_) => error.to_string(),
    };
    TaskFailure::new(error.failure_kind(), message)
}

/// Lock a std mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Segment;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Blocks every call until released, then echoes the audio path
    struct GatedProvider {
        gate: Notify,
    }

    #[async_trait]
    impl TranscriptionProvider for GatedProvider {
        async fn transcribe(
            &self,
            audio: &AudioInput,
            _params: &TranscriptionParams,
            _deadline: Duration,
        ) -> Result<Vec<Segment>, ProviderError> {
            self.gate.notified().await;
            Ok(vec![Segment {
                text: audio.path.display().to_string(),
                ..Default::default()
            }])
        }
    }

    fn config(workers: usize, queue_size: usize) -> ServiceConfig {
        ServiceConfig {
            workers,
            queue_size,
            ..ServiceConfig::default()
        }
    }

    fn request(name: &str) -> JobRequest {
        let audio = AudioInput::from_bytes(name, name.as_bytes());
        let fingerprint = crate::cache::fingerprint(&audio.digest, &TranscriptionParams::default());
        JobRequest {
            audio,
            params: TranscriptionParams::default(),
            fingerprint,
        }
    }

    fn manager(
        workers: usize,
        queue_size: usize,
        provider: Arc<dyn TranscriptionProvider>,
    ) -> (QueueManager, Arc<TaskRegistry>) {
        let registry = Arc::new(TaskRegistry::new());
        let cache = Arc::new(ResultCache::new(true, Duration::from_secs(60)));
        let manager = QueueManager::new(
            &config(workers, queue_size),
            Arc::clone(&registry),
            cache,
            provider,
            Metrics::disabled(),
        );
        (manager, registry)
    }

    async fn wait_for_status(registry: &TaskRegistry, task_id: &str, status: TaskStatus) {
        for _ in 0..500 {
            if registry.get(task_id).map(|t| t.status) == Ok(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} never reached {}", task_id, status);
    }

    #[tokio::test]
    async fn rejects_beyond_capacity_without_creating_a_task() {
        let provider = Arc::new(GatedProvider { gate: Notify::new() });
        let (manager, registry) = manager(1, 2, provider.clone());

        let first = manager.submit(request("a")).unwrap();
        let second = manager.submit(request("b")).unwrap();
        wait_for_status(&registry, &first, TaskStatus::Started).await;

        let err = manager.submit(request("c")).unwrap_err();
        assert_eq!(err, CoreError::QueueFull { capacity: 2 });
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&second).unwrap().status, TaskStatus::Queued);
        assert_eq!(manager.queue_depth(), 1);

        provider.gate.notify_one();
        wait_for_status(&registry, &first, TaskStatus::Completed).await;
        provider.gate.notify_one();
        wait_for_status(&registry, &second, TaskStatus::Completed).await;
        assert_eq!(manager.outstanding(), 0);
    }

    #[tokio::test]
    async fn jobs_are_started_in_admission_order() {
        let provider = Arc::new(GatedProvider { gate: Notify::new() });
        let (manager, registry) = manager(1, 10, provider.clone());

        let ids: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|name| manager.submit(request(name)).unwrap())
            .collect();

        for id in &ids {
            wait_for_status(&registry, id, TaskStatus::Started).await;
            provider.gate.notify_one();
            wait_for_status(&registry, id, TaskStatus::Completed).await;
        }

        let texts: Vec<String> = ids
            .iter()
            .map(|id| registry.get(id).unwrap().result.unwrap()[0].text.clone())
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn closed_queue_refuses_new_jobs_but_drains_queued_ones() {
        let provider = Arc::new(GatedProvider { gate: Notify::new() });
        let (manager, registry) = manager(1, 5, provider.clone());
        let first = manager.submit(request("a")).unwrap();
        let second = manager.submit(request("b")).unwrap();

        manager.close();
        assert!(manager.is_closed());
        assert_eq!(manager.submit(request("c")), Err(CoreError::ShuttingDown));

        provider.gate.notify_one();
        wait_for_status(&registry, &first, TaskStatus::Completed).await;
        provider.gate.notify_one();
        manager.drain().await;
        assert_eq!(registry.get(&second).unwrap().status, TaskStatus::Completed);
    }
    #[tokio::test]
    async fn queue_depth_counts_only_jobs_waiting_for_a_worker() {
        let provider = Arc::new(GatedProvider { gate: Notify::new() });
        let (manager, registry) = manager(1, 3, provider.clone());
        let ids: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|name| manager.submit(request(name)).unwrap())
            .collect();

        for (done, id) in ids.iter().enumerate() {
            wait_for_status(&registry, id, TaskStatus::Started).await;
            assert_eq!(manager.queue_depth(), ids.len() - done - 1);
            assert_eq!(manager.started_count(), 1);
            provider.gate.notify_one();
            wait_for_status(&registry, id, TaskStatus::Completed).await;
        }

        for _ in 0..500 {
            if manager.started_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.started_count(), 0);
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.queue_depth(), 0);
    }

    #[test]
    fn transient_failures_carry_the_core_error_text() {
        let transient = failure_for(&ProviderError::Transient("upstream 503".into()));
        assert_eq!(transient.kind, FailureKind::ProviderTransient);
        assert_eq!(transient.message, "Provider transient failure: upstream 503");

        let permanent = failure_for(&ProviderError::Permanent("bad codec".into()));
        assert_eq!(permanent.kind, FailureKind::ProviderPermanent);
        assert_eq!(permanent.message, "permanent provider failure: bad codec");
    }
}
