use actix_web::{middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info};
use std::io;
use std::sync::Arc;

use transcribe_api::config::defaults;
use transcribe_api::config_loader::load_config;
use transcribe_api::config_validator::ConfigValidator;
use transcribe_api::handlers::{configure, AppState, Authentication};
use transcribe_api::{create_metrics_exporter, CommandProvider, Metrics, TranscriptionService};

#[actix_web::main]
async fn main() -> io::Result<()> {
    if std::env::args().any(|arg| arg == "--print-config") {
        print!("{}", ConfigValidator::generate_sample_config());
        return Ok(());
    }

    // The file only fills in what the environment leaves unset
    let config_file_loaded = load_config();
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| defaults::LOG_LEVEL.to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();
    if config_file_loaded {
        info!("Configuration file applied");
    }

    let config = ConfigValidator::validate_and_load().map_err(|results| {
        error!(
            "Refusing to start with {} configuration error(s)",
            results.errors.len()
        );
        io::Error::new(io::ErrorKind::InvalidInput, "invalid configuration")
    })?;

    let exporter = create_metrics_exporter(&config.metrics.exporter_type).map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;
    let metrics = Metrics::new(exporter);

    config.server.ensure_temp_dir()?;

    info!(
        "Starting Transcription API server on http://{}:{}",
        config.server.host, config.server.port
    );
    info!("Using temp directory: {}", config.server.temp_dir);
    info!("Recognition command: {}", config.provider.command_path);
    info!(
        "Workers: {}, queue size: {}, provider timeout: {}s",
        config.service.workers,
        config.service.queue_size,
        config.service.timeout.as_secs()
    );
    info!("Metrics exporter: {}", config.metrics.exporter_type);

    let provider = Arc::new(CommandProvider::new(config.provider.clone()));
    let service = Arc::new(TranscriptionService::new(
        config.service.clone(),
        provider,
        metrics.clone(),
    ));

    let state = AppState {
        service: Arc::clone(&service),
        server: config.server.clone(),
        default_engine_model: config.provider.engine_model.clone(),
    };
    let enable_authorization = config.server.enable_authorization;
    let api_token = config.server.api_token.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(Authentication::new(
                enable_authorization,
                api_token.as_deref(),
                metrics.clone(),
            ))
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(configure)
    })
    .workers(config.server.effective_http_workers())
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    service.shutdown().await;
    Ok(())
}
