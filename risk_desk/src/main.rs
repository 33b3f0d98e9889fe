mod config;
mod cors;
mod handlers;
mod pipeline;
mod state;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware::Logger, web};
use dotenv::dotenv;
use pretty_env_logger::env_logger::{Builder, Env};

use crate::config::AppConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    if cli::run_cli().await {
        return Ok(());
    }

    let logger_env = Env::default().default_filter_or("info");
    let mut logger_builder = Builder::from_env(logger_env);
    logger_builder.init();

    let config = AppConfig::from_env().map_err(|e| {
        log::error!("Application initialization failed: {:#}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    let origin_policy = Arc::new(config.origin_policy().map_err(|e| {
        log::error!("Invalid CORS configuration: {:#}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?);

    let state = config.create_app_state().await.map_err(|e| {
        log::error!("Application initialization failed: {:#}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    log::info!(
        "App state initialized successfully (anomaly model trained: {}, deep analysis: {})",
        state.model.is_trained(),
        state.analyst.is_enabled()
    );

    let data = web::Data::new(state);

    log::info!("Listening on {}:{}", config.bind_addr, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(cors::build_cors(origin_policy.clone()))
            .wrap(Logger::new("%a %t %r %s  %{Referer}i %Dms"))
            .configure(handlers::configure)
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await
}
