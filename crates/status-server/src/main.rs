//! Winmon status server binary

use anyhow::Context;
use healthcheck::SystemChecker;
use status_server::{Config, MemoryInventory, StatusServer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let level = config.logging.level.as_deref().unwrap_or("info");
    common::logging::init_with_format(config.logging.format.as_deref(), level);

    tracing::info!("Winmon status server starting");

    let inventory = Arc::new(MemoryInventory::from_settings(&config.inventory));
    let checker = Arc::new(SystemChecker::new().context("failed to build service prober")?);
    let server = StatusServer::new(config.to_server_config(), inventory, checker);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl-C");
                    cancel.cancel();
                }
                Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        }
    });

    server.run(cancel).await?;
    Ok(())
}
