use std::path::Path;

use actix_web::{web, App, HttpServer};
use log::{error, info, warn};

use media_vault::api::{configure, json_config};
use media_vault::app_state::AppState;
use media_vault::config::AppConfig;
use media_vault::storage::sweeper::spawn_sweeper;

fn init_logging(config_file: &str) {
    if Path::new(config_file).exists() {
        match log4rs::init_file(config_file, Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Failed to load log config {}: {}", config_file, e),
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    warn!("Log config {} not found, logging to stderr", config_file);
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = AppConfig::load()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    init_logging(&config.logging.config_file);

    let app_state = AppState::from_config(config.clone()).map_err(|e| {
        error!("Failed to initialize application state: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    let _sweeper = spawn_sweeper(
        app_state.storage.clone(),
        app_state.locks.clone(),
        &config.sweep,
    );

    let server = &config.server;
    info!("Starting server on {}:{}", server.host, server.port);

    let app_data = web::Data::new(app_state);
    let max_json_size = server.max_json_size;
    let max_chunk_size = config.upload.max_chunk_size as usize;
    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_data.clone())
            .app_data(web::PayloadConfig::default().limit(max_chunk_size))
            .app_data(json_config(max_json_size))
            .configure(configure)
    })
    .workers(server.workers.max(1))
    .bind((server.host.as_str(), server.port))?
    .run()
    .await
}
