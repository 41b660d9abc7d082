// HTTP handlers for the Transcription API
//
// This module is the thin adapter between actix-web and the transcription
// service: it extracts uploads, derives the rate limiting scope and maps
// core errors onto HTTP statuses.

pub mod authentication;
pub mod form;
pub mod routes;

use actix_web::{web, HttpRequest};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::service::TranscriptionService;

pub use self::authentication::Authentication;
pub use self::routes::{
    health, list_tasks, metrics_endpoint, transcribe, transcription_options,
    transcription_report, transcription_status,
};

/// Header a client may use to name its own rate limiting scope
pub const CLIENT_ID_HEADER: &str = "X-Client-Id";

pub use crate::rate_limiter::GLOBAL_SCOPE;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TranscriptionService>,
    pub server: ServerConfig,
    /// Engine model recorded on requests that name none
    pub default_engine_model: String,
}

/// Rate limiting scope of a request: the client id header, else the peer
/// address, else the global scope
pub fn client_scope(req: &HttpRequest) -> String {
    req.headers()
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| GLOBAL_SCOPE.to_string())
}

/// Register every route on an actix service config
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(transcribe)
        .service(transcription_status)
        .service(transcription_report)
        .service(transcription_options)
        .service(list_tasks)
        .service(health)
        .service(metrics_endpoint);
}
