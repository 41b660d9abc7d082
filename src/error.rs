// Error handling for the Transcription API
//
// This module defines the orchestration error taxonomy and the HTTP handler
// errors, plus the conversions between them.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use actix_web::{HttpResponse, ResponseError};

use crate::models::{ErrorResponse, TaskStatus};

/// Errors raised by the orchestration core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Caller exceeded its request quota
    #[error("Rate limit exceeded for scope '{0}'")]
    RateLimited(String),

    /// Admission ceiling reached
    #[error("Task queue is full ({capacity} outstanding jobs)")]
    QueueFull { capacity: usize },

    /// Provider failed for a recoverable reason
    #[error("Provider transient failure: {0}")]
    ProviderTransient(String),

    /// Provider exceeded the configured deadline
    #[error("Provider did not answer within {0} seconds")]
    ProviderTimeout(u64),

    /// Unknown task id
    #[error("Task not found: {0}")]
    NotFound(String),

    /// An illegal state transition was attempted
    #[error("Illegal transition for task {task_id}: {from} -> {to}")]
    InternalInconsistency {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The admission queue no longer accepts work
    #[error("Service is shutting down")]
    ShuttingDown,
}

impl CoreError {
    /// Short machine readable reason surfaced to callers
    pub fn reason(&self) -> &'static str {
        match self {
            CoreError::RateLimited(_) => "rate_limited",
            CoreError::QueueFull { .. } => "queue_full",
            CoreError::ProviderTransient(_) => "provider_transient",
            CoreError::ProviderTimeout(_) => "provider_timeout",
            CoreError::NotFound(_) => "not_found",
            CoreError::InternalInconsistency { .. } => "internal_inconsistency",
            CoreError::ShuttingDown => "shutting_down",
        }
    }
}

/// Errors that can occur in the HTTP handlers
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Error when processing multipart form data
    #[error("Form error: {0}")]
    FormError(String),

    /// Error when saving file data
    #[error("File error: {0}")]
    FileError(#[from] io::Error),

    /// Error when no audio file was provided
    #[error("No audio file provided in the request")]
    NoAudioFile,

    /// Error when a file is too large
    #[error("File too large: {0} bytes exceeds limit of {1} bytes")]
    FileTooLarge(u64, u64),

    /// Report requested for a task that has not completed
    #[error("Task {0} has no result yet (status: {1})")]
    NotReady(String, TaskStatus),

    /// Error raised by the orchestration core
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl HandlerError {
    /// Create a new FormError
    pub fn form_error<S: Into<String>>(msg: S) -> Self {
        Self::FormError(msg.into())
    }

    /// Helper to clean up a folder when error occurs
    pub fn with_cleanup(self, folder: Option<&PathBuf>) -> Self {
        if let Some(folder) = folder {
            crate::file_utils::cleanup_folder(folder);
        }
        self
    }
}

impl ResponseError for HandlerError {
    fn error_response(&self) -> HttpResponse {
        let reason = match self {
            HandlerError::Core(e) => Some(e.reason().to_string()),
            _ => None,
        };
        let error_response = ErrorResponse {
            error: self.to_string(),
            reason,
        };

        match self {
            HandlerError::NoAudioFile | HandlerError::FormError(_) => {
                HttpResponse::BadRequest().json(error_response)
            }
            HandlerError::FileTooLarge(_, _) => {
                HttpResponse::PayloadTooLarge().json(error_response)
            }
            HandlerError::NotReady(_, _) => HttpResponse::Conflict().json(error_response),
            HandlerError::Core(CoreError::RateLimited(_)) => {
                HttpResponse::TooManyRequests().json(error_response)
            }
            HandlerError::Core(CoreError::QueueFull { .. } | CoreError::ShuttingDown) => {
                HttpResponse::ServiceUnavailable().json(error_response)
            }
            HandlerError::Core(CoreError::NotFound(_)) => {
                HttpResponse::NotFound().json(error_response)
            }
            _ => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn core_errors_map_to_http_status() {
        let cases = [
            (CoreError::RateLimited("global".into()), StatusCode::TOO_MANY_REQUESTS),
            (CoreError::QueueFull { capacity: 2 }, StatusCode::SERVICE_UNAVAILABLE),
            (CoreError::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE),
            (CoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                CoreError::InternalInconsistency {
                    task_id: "x".into(),
                    from: TaskStatus::Completed,
                    to: TaskStatus::Failed,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(HandlerError::from(err).error_response().status(), status);
        }
    }

    #[test]
    fn upload_errors_map_to_client_errors() {
        assert_eq!(
            HandlerError::FileTooLarge(10, 5).error_response().status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            HandlerError::NotReady("t".into(), TaskStatus::Queued)
                .error_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            HandlerError::NoAudioFile.error_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn rejection_reasons_are_stable() {
        assert_eq!(CoreError::RateLimited("a".into()).reason(), "rate_limited");
        assert_eq!(CoreError::QueueFull { capacity: 1 }.reason(), "queue_full");
    }
}
