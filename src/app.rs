use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::infrastructure::bootstrap;
use crate::infrastructure::config::AppConfig;
use crate::interfaces::http::start_server;

pub async fn run() -> std::io::Result<()> {
    let config = AppConfig::load().map_err(|e| std::io::Error::other(e.to_string()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.clone()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let state = bootstrap::setup(&config).await.map_err(|err| {
        error!(error = %err, "Failed to initialize services");
        std::io::Error::other(err.to_string())
    })?;

    let (host, port) = config.bind_address();
    info!(%host, port, "Starting HTTP server");
    start_server(state, (host, port))?.await
}
