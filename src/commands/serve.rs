use anyhow::{Context, Result};

use opds_aggregator::config::Config;
use opds_aggregator::metrics;
use opds_aggregator::server::GatewayServer;

/// Run the gateway until Ctrl-C
pub async fn serve(config: Config) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics registration failed; /metrics will be empty");
    }

    let server = GatewayServer::new(config).context("Failed to initialize gateway")?;

    println!("{}", server.info().display());
    println!();

    server
        .start_with_shutdown(shutdown_signal())
        .await
        .context("Gateway server failed")?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}
