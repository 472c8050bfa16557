//! ParkSense ingest daemon entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting ParkSense ingest daemon"
    );

    let path = config::config_path(
        std::env::args().nth(1),
        std::env::var("PARKSENSE_CONFIG").ok(),
    );
    let config = config::Config::load(&path)?;
    tracing::info!(
        path = %path.display(),
        host = %config.host,
        port = config.port,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("ingest daemon shut down cleanly");
    Ok(())
}
