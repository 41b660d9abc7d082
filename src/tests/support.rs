use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::ServiceConfig;
use crate::metrics::Metrics;
use crate::models::{AudioInput, Segment, TaskStatus, TranscriptionParams};
use crate::provider::{ProviderError, TranscriptionProvider};
use crate::service::TranscriptionService;

/// Echoes the audio path once released; counts calls
#[derive(Default)]
pub struct GatedProvider {
    pub gate: Notify,
    pub calls: AtomicUsize,
}

#[async_trait]
impl TranscriptionProvider for GatedProvider {
    async fn transcribe(
        &self,
        audio: &AudioInput,
        _params: &TranscriptionParams,
        _deadline: Duration,
    ) -> Result<Vec<Segment>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(vec![Segment {
            text: audio.path.display().to_string(),
            ..Segment::default()
        }])
    }
}

/// Answers immediately; counts calls
#[derive(Default)]
pub struct EchoProvider {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TranscriptionProvider for EchoProvider {
    async fn transcribe(
        &self,
        audio: &AudioInput,
        _params: &TranscriptionParams,
        _deadline: Duration,
    ) -> Result<Vec<Segment>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Segment {
            text: audio.path.display().to_string(),
            start_time: 0.0,
            end_time: 1.0,
            ..Segment::default()
        }])
    }
}

/// Never answers
pub struct PendingProvider;

#[async_trait]
impl TranscriptionProvider for PendingProvider {
    async fn transcribe(
        &self,
        _audio: &AudioInput,
        _params: &TranscriptionParams,
        _deadline: Duration,
    ) -> Result<Vec<Segment>, ProviderError> {
        std::future::pending().await
    }
}

/// Fails every call with the same error
pub struct FailingProvider {
    pub error: ProviderError,
    pub calls: AtomicUsize,
}

impl FailingProvider {
    pub fn new(error: ProviderError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TranscriptionProvider for FailingProvider {
    async fn transcribe(
        &self,
        _audio: &AudioInput,
        _params: &TranscriptionParams,
        _deadline: Duration,
    ) -> Result<Vec<Segment>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Takes a fixed time per call
pub struct SleepingProvider(pub Duration);

#[async_trait]
impl TranscriptionProvider for SleepingProvider {
    async fn transcribe(
        &self,
        audio: &AudioInput,
        _params: &TranscriptionParams,
        _deadline: Duration,
    ) -> Result<Vec<Segment>, ProviderError> {
        tokio::time::sleep(self.0).await;
        Ok(vec![Segment {
            text: audio.path.display().to_string(),
            ..Segment::default()
        }])
    }
}

/// Core settings with limiting and caching switched off
pub fn plain_config(workers: usize, queue_size: usize) -> ServiceConfig {
    ServiceConfig {
        workers,
        queue_size,
        rate_limit_enabled: false,
        cache_enabled: false,
        ..ServiceConfig::default()
    }
}

pub fn service(config: ServiceConfig, provider: Arc<dyn TranscriptionProvider>) -> TranscriptionService {
    TranscriptionService::new(config, provider, Metrics::disabled())
}

/// In-memory audio with a distinct digest per name
pub fn audio(name: &str) -> AudioInput {
    AudioInput::from_bytes(name, name.as_bytes())
}

/// Audio backed by a real upload folder
pub fn audio_in_folder(name: &str) -> AudioInput {
    let folder: PathBuf =
        std::env::temp_dir().join(format!("transcribe_api_scenario_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&folder).unwrap();
    let path = folder.join(name);
    std::fs::write(&path, name.as_bytes()).unwrap();
    AudioInput {
        folder: Some(folder),
        ..AudioInput::from_bytes(path, name.as_bytes())
    }
}

pub async fn wait_for_status(service: &TranscriptionService, task_id: &str, status: TaskStatus) {
    for _ in 0..4000 {
        if service.status(task_id).map(|t| t.status) == Ok(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {} never reached {}", task_id, status);
}

pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..4000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}
