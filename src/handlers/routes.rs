// API route handlers for the Transcription API
//
// Each handler delegates to the transcription service and records the
// request duration. Failures surface as `HandlerError`, whose
// `ResponseError` impl picks the HTTP status.

use actix_multipart::Multipart;
use actix_web::{get, options, post, web, HttpRequest, HttpResponse};
use log::{error, info};
use std::time::Instant;

use crate::error::HandlerError;
use crate::handlers::form::extract_upload;
use crate::handlers::{client_scope, AppState};
use crate::models::{TaskStatus, TranscriptionResponse};
use crate::result_parser::format_report;

/// Handler for transcription requests
///
/// Streams the uploaded audio to disk, then hands it to the service. The
/// answer is 202 with the task id, whether the job was queued or served
/// from the cache.
#[post("/transcription")]
pub async fn transcribe(
    req: HttpRequest,
    form: Multipart,
    state: web::Data<AppState>,
) -> Result<HttpResponse, HandlerError> {
    let start_time = Instant::now();
    let metrics = state.service.metrics();
    let scope = client_scope(&req);

    let result = async {
        let (audio, params) =
            extract_upload(form, &state.server, &state.default_engine_model).await?;
        metrics.record_upload_size(audio.size_bytes).await;
        Ok::<_, HandlerError>(state.service.intake(&scope, audio, params).await?)
    }
    .await;

    let status = match &result {
        Ok(_) => "202",
        Err(HandlerError::Core(e)) => {
            info!("Transcription request from {} rejected: {}", scope, e);
            e.reason()
        }
        Err(e) => {
            error!("Transcription request from {} failed: {}", scope, e);
            "error"
        }
    };
    metrics
        .record_http_request("/transcription", "POST", status, start_time.elapsed())
        .await;

    let accepted = result?;
    info!(
        "Task {} accepted for {}{}",
        accepted.task_id,
        scope,
        if accepted.cached { " (cached)" } else { "" }
    );
    Ok(HttpResponse::Accepted().json(TranscriptionResponse {
        status_url: format!("/transcription/{}", accepted.task_id),
        task_id: accepted.task_id,
        cached: accepted.cached,
    }))
}

/// Handler for transcription status requests
#[get("/transcription/{task_id}")]
pub async fn transcription_status(
    task_id: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, HandlerError> {
    let start_time = Instant::now();
    let result = state.service.status(&task_id);

    let status = if result.is_ok() { "200" } else { "404" };
    state
        .service
        .metrics()
        .record_http_request("/transcription/{task_id}", "GET", status, start_time.elapsed())
        .await;

    Ok(HttpResponse::Ok().json(result?))
}

/// Plain text report of a completed task
#[get("/transcription/{task_id}/report")]
pub async fn transcription_report(
    task_id: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, HandlerError> {
    let start_time = Instant::now();
    let result = state
        .service
        .status(&task_id)
        .map_err(HandlerError::from)
        .and_then(|task| match (task.status, task.result) {
            (TaskStatus::Completed, Some(segments)) => Ok(format_report(&segments)),
            (status, _) => Err(HandlerError::NotReady(task.task_id, status)),
        });

    let status = match &result {
        Ok(_) => "200",
        Err(HandlerError::NotReady(..)) => "409",
        Err(_) => "404",
    };
    state
        .service
        .metrics()
        .record_http_request(
            "/transcription/{task_id}/report",
            "GET",
            status,
            start_time.elapsed(),
        )
        .await;

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(result?))
}

/// Active tasks and the concurrency ceiling
#[get("/tasks")]
pub async fn list_tasks(state: web::Data<AppState>) -> HttpResponse {
    let start_time = Instant::now();
    let response = state.service.list_tasks();
    state
        .service
        .metrics()
        .record_http_request("/tasks", "GET", "200", start_time.elapsed())
        .await;
    HttpResponse::Ok().json(response)
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.service.health())
}

/// Metrics endpoint in Prometheus text format
#[get("/metrics")]
pub async fn metrics_endpoint(state: web::Data<AppState>) -> HttpResponse {
    match state.service.metrics().export().await {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            error!("Failed to export metrics: {}", e);
            HttpResponse::InternalServerError().body("Failed to export metrics")
        }
    }
}

/// Handler for OPTIONS requests to the transcription endpoint
#[options("/transcription")]
pub async fn transcription_options(_req: HttpRequest) -> HttpResponse {
    let allowed_methods = "OPTIONS, POST, GET";

    HttpResponse::Ok()
        .append_header(("Allow", allowed_methods))
        .append_header(("Access-Control-Allow-Methods", allowed_methods))
        .append_header((
            "Access-Control-Allow-Headers",
            "Authorization, Content-Type, X-Client-Id",
        ))
        .append_header(("Access-Control-Max-Age", "86400"))
        .finish()
}
