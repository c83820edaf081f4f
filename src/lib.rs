pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod events;
pub mod interpret;
pub mod loader;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod rules;
pub mod service;

use tracing_subscriber::EnvFilter;

/// Process entry: tracing, configuration, then the service until Ctrl-C.
pub async fn run() -> Result<(), service::StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = config::ServiceConfig::from_env();
    let service = service::Service::build(&config)?;
    service.run().await
}
