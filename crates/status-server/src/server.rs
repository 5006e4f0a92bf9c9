//! Wires the status engine together and runs it until cancelled.

use crate::broadcast_worker::{ServerSnapshotSource, ServiceSnapshotSource, StatusBroadcastWorker};
use crate::broadcaster::{Broadcaster, SseBroadcaster};
use crate::http_server::{AppState, HttpServer, router};
use crate::inventory::Inventory;
use crate::metrics::MetricsRegistry;
use crate::poller::ServerStatusWorker;
use crate::topic::JwtTopicResolver;
use crate::types::ServerConfig;
use healthcheck::{NetworkChecker, StatusCache};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Status server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Pool(#[from] crate::pool::PoolError),
}

/// The status monitoring engine and its HTTP surface
pub struct StatusServer {
    config: ServerConfig,
    inventory: Arc<dyn Inventory>,
    checker: Arc<dyn NetworkChecker>,
    cache: Arc<StatusCache>,
}

impl StatusServer {
    pub fn new(
        config: ServerConfig,
        inventory: Arc<dyn Inventory>,
        checker: Arc<dyn NetworkChecker>,
    ) -> Self {
        Self {
            config,
            inventory,
            checker,
            cache: Arc::new(StatusCache::new()),
        }
    }

    /// Status cache shared by every component
    pub fn cache(&self) -> Arc<StatusCache> {
        self.cache.clone()
    }

    /// Bind the configured address and [`serve`](Self::serve) on it
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.listen_addr.clone(),
                source,
            })?;
        self.serve(listener, cancel).await
    }

    /// Run on `listener` until `cancel` fires.
    ///
    /// Shutdown waits at most `shutdown_timeout` for the loops before the
    /// broadcaster is closed, which ends every live stream.
    pub async fn serve(
        self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), ServerError> {
        info!(addr = ?listener.local_addr().ok(), "Starting status server");

        let metrics = if self.config.metrics_enabled {
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Shutdown requested during cache warm-up");
                return Ok(());
            }
            listed = self.inventory.list_monitored_hosts() => listed,
        };
        match listed {
            Ok(hosts) => {
                let warmed = self.cache.warm(&hosts).await;
                info!(hosts = hosts.len(), warmed, "Status cache warmed");
            }
            Err(e) => warn!(error = %e, "Cache warm-up skipped"),
        }

        let auth = Arc::new(JwtTopicResolver::new(
            self.config.jwt_secret.clone(),
            self.config.cookie_name.clone(),
        ));
        let broadcaster = Arc::new(SseBroadcaster::new(
            auth.clone(),
            self.config.broadcast_channel_capacity,
            self.config.keep_alive,
            metrics.clone(),
        ));

        let poller = ServerStatusWorker::new(
            self.inventory.clone(),
            self.cache.clone(),
            self.checker.clone(),
            &self.config,
            metrics.clone(),
        )?;

        let workers = [
            StatusBroadcastWorker::new(
                self.inventory.clone(),
                Arc::new(ServerSnapshotSource::new(self.cache.clone())),
                broadcaster.clone(),
                self.config.broadcast_interval,
                metrics.clone(),
            ),
            StatusBroadcastWorker::new(
                self.inventory.clone(),
                Arc::new(ServiceSnapshotSource::new(self.inventory.clone())),
                broadcaster.clone(),
                self.config.broadcast_interval,
                metrics.clone(),
            ),
        ];

        let app = router(
            AppState {
                cache: self.cache.clone(),
                inventory: self.inventory.clone(),
                auth,
                metrics: metrics.clone(),
            },
            broadcaster.as_ref(),
        );

        let mut loops: Vec<JoinHandle<()>> = Vec::new();
        loops.push(tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if let Err(e) = poller.run(cancel).await {
                    warn!(error = %e, "Server status worker failed to start");
                }
            }
        }));
        for worker in workers {
            loops.push(tokio::spawn(worker.run(cancel.clone())));
        }
        if let Some(ref metrics) = metrics {
            loops.push(tokio::spawn(record_transitions(
                self.cache.clone(),
                metrics.clone(),
                cancel.clone(),
            )));
        }

        let http = tokio::spawn(HttpServer::new(listener, app).run(cancel.clone()));

        cancel.cancelled().await;
        info!("Shutdown requested");

        let drain = futures::future::join_all(loops);
        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.config.shutdown_timeout,
                "Workers did not stop in time, closing anyway"
            );
        }

        // Live streams never finish on their own; graceful HTTP shutdown
        // waits for them until the broadcaster is closed.
        broadcaster.close();

        match tokio::time::timeout(self.config.shutdown_timeout, http).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server error"),
            Ok(Err(e)) => warn!(error = %e, "HTTP server task failed"),
            Err(_) => warn!("HTTP server did not stop in time"),
        }

        info!("Status server stopped");
        Ok(())
    }
}

/// Feed cache transitions into the metrics registry
async fn record_transitions(
    cache: Arc<StatusCache>,
    metrics: Arc<MetricsRegistry>,
    cancel: CancellationToken,
) {
    let mut changes = cache.subscribe_changes();

    loop {
        let change = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            change = changes.recv() => change,
        };

        match change {
            Ok(change) => metrics.record_status_transition(change.previous, change.current),
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Transition recorder lagging");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
