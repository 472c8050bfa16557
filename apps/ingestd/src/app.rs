//! Wires the ingest server to the process lifecycle.

use std::sync::Arc;

use parksense_ingest_server::{IngestServer, ParkingHandler};

use crate::config::Config;

/// Runs the ingest server until Ctrl-C or a fatal server error.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let server_config = config.to_server_config();
    let handler = ParkingHandler::from_config(&server_config);
    let server = IngestServer::new(server_config, handler);

    let server_run = Arc::clone(&server);
    let mut run_task = tokio::spawn(async move { server_run.run().await });

    tokio::select! {
        result = &mut run_task => {
            // The accept loop only returns on its own when binding fails.
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
    }

    let info = server.state().info();
    tracing::info!(
        host = %info.host,
        port = info.port,
        clients = info.clients,
        images_dir = %info.images_dir.display(),
        "stopping server"
    );

    server.shutdown();
    run_task.await??;
    Ok(())
}
