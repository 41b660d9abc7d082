// Transcription API data models
//
// This module contains the data models shared by the orchestration core and
// the HTTP surface: tasks, segments, request parameters and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default provider engine model
pub const DEFAULT_ENGINE_MODEL: &str = "16k_zh";

/// Lifecycle state of a transcription task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted and waiting for a worker
    Queued,
    /// A worker is running the provider call
    Started,
    /// Provider returned a result
    Completed,
    /// Provider returned an error
    Failed,
    /// Provider did not answer before the deadline
    Timeout,
}

impl TaskStatus {
    /// Terminal states accept no further transition
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Started)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recognized utterance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Segment {
    /// Recognized text
    pub text: String,
    /// Start time in seconds
    pub start_time: f64,
    /// End time in seconds
    pub end_time: f64,
    /// Speaker label when diarization was requested
    pub speaker_id: Option<i64>,
    /// Emotion label when emotion recognition was requested
    pub emotion: Option<String>,
    pub emotion_score: Option<f64>,
}

/// Category of a recorded task failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ProviderTransient,
    ProviderPermanent,
    ProviderTimeout,
    Internal,
}

/// Structured failure description stored on a failed or timed-out task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new<S: Into<String>>(kind: FailureKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Snapshot of a transcription task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Segment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
}

/// Recognition options that change the provider output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionParams {
    /// Separate speakers in the output
    pub speaker_diarization: bool,
    /// Attach an emotion label to each segment
    pub emotion_recognition: bool,
    /// Provider engine model (e.g. "16k_zh")
    pub engine_model: String,
}

impl Default for TranscriptionParams {
    fn default() -> Self {
        Self {
            speaker_diarization: true,
            emotion_recognition: true,
            engine_model: DEFAULT_ENGINE_MODEL.to_string(),
        }
    }
}

/// Reference to uploaded audio content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInput {
    /// Folder owning the uploaded file, removed once the job is finished
    pub folder: Option<PathBuf>,
    /// Path to the audio file handed to the provider
    pub path: PathBuf,
    /// Hex SHA-256 of the audio bytes
    pub digest: String,
    pub size_bytes: u64,
}

impl AudioInput {
    /// Build an input for bytes that are not backed by an upload folder
    pub fn from_bytes<P: Into<PathBuf>>(path: P, bytes: &[u8]) -> Self {
        Self {
            folder: None,
            path: path.into(),
            digest: crate::cache::digest_bytes(bytes),
            size_bytes: bytes.len() as u64,
        }
    }
}

/// Response for an accepted transcription request
#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub task_id: String,
    /// URL to poll for the task state
    pub status_url: String,
    /// True when the result was served from the cache
    pub cached: bool,
}

/// Response for the task listing endpoint
#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub active_tasks: usize,
    pub max_tasks: usize,
    pub tasks: Vec<Task>,
}

/// Error response for API
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine readable rejection reason (rate_limited, queue_full, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_active_states_are_disjoint() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Started,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Timeout,
        ] {
            assert_ne!(status.is_terminal(), status.is_active(), "{status}");
        }
    }

    #[test]
    fn task_serializes_with_snake_case_status() {
        let task = Task {
            task_id: "abc".into(),
            status: TaskStatus::Timeout,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            result: None,
            error: Some(TaskFailure::new(FailureKind::ProviderTimeout, "too slow")),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "timeout");
        assert_eq!(json["error"]["kind"], "provider_timeout");
        assert!(json.get("result").is_none());
    }
}
