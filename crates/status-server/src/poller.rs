//! Periodic fan-out of host evaluations.

use crate::inventory::Inventory;
use crate::metrics::MetricsRegistry;
use crate::pool::{PoolError, TaskHandler, WorkerPool};
use crate::types::ServerConfig;
use async_trait::async_trait;
use healthcheck::{
    EvaluateError, NetworkChecker, ProbeSettings, ServerStatusRecord, StatusCache,
    check_server_status,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one poll tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Hosts listed by the inventory
    pub hosts: usize,
    /// Evaluations accepted by the pool
    pub submitted: usize,
    /// Evaluations dropped on a full queue; retried next tick
    pub dropped: usize,
    /// Cache entries removed for hosts gone from the inventory
    pub pruned: usize,
}

/// Runs one evaluation per task
struct EvaluationHandler {
    cache: Arc<StatusCache>,
    checker: Arc<dyn NetworkChecker>,
    settings: ProbeSettings,
    metrics: Option<Arc<MetricsRegistry>>,
}

#[async_trait]
impl TaskHandler<ServerStatusRecord> for EvaluationHandler {
    async fn handle(&self, record: ServerStatusRecord, cancel: &CancellationToken) {
        let host_id = record.host_id;
        let started = Instant::now();

        let result = check_server_status(
            record,
            &self.cache,
            self.checker.as_ref(),
            &self.settings,
            cancel,
        )
        .await;

        match result {
            Ok(evaluation) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.record_evaluation(&evaluation, started.elapsed());
                }
            }
            Err(EvaluateError::Cancelled(_)) => {
                debug!(host_id, "Evaluation abandoned");
            }
            Err(e) => {
                warn!(host_id, error = %e, "Evaluation failed");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_error("missing_address");
                }
            }
        }
    }
}

/// Polling orchestrator.
///
/// Every tick it lists the monitored hosts and submits one evaluation per
/// host to a bounded worker pool. Listing failures and queue overflow are
/// logged and left to the next tick.
pub struct ServerStatusWorker {
    inventory: Arc<dyn Inventory>,
    cache: Arc<StatusCache>,
    pool: WorkerPool<ServerStatusRecord>,
    interval: Duration,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ServerStatusWorker {
    /// Create a worker. Fails on an empty pool configuration.
    pub fn new(
        inventory: Arc<dyn Inventory>,
        cache: Arc<StatusCache>,
        checker: Arc<dyn NetworkChecker>,
        config: &ServerConfig,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Result<Self, PoolError> {
        let handler: Arc<dyn TaskHandler<ServerStatusRecord>> = Arc::new(EvaluationHandler {
            cache: cache.clone(),
            checker,
            settings: config.probe.clone(),
            metrics: metrics.clone(),
        });
        let pool = WorkerPool::new(config.pool_workers, config.backlog_multiplier, handler)?;

        Ok(Self {
            inventory,
            cache,
            pool,
            interval: config.poll_interval,
            metrics,
        })
    }

    /// Poll until `cancel` fires.
    ///
    /// The first tick happens immediately. On return every worker has exited,
    /// so no evaluation writes to the cache afterwards.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), PoolError> {
        self.pool.start(cancel.clone())?;
        info!(
            interval = ?self.interval,
            workers = self.pool.workers(),
            "Server status worker started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "Failed to list monitored hosts, retrying next tick");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_error("inventory");
                }
            }
        }

        self.pool.stop().await;
        info!("Server status worker stopped");
        Ok(())
    }

    /// List the inventory once, prune vanished hosts and dispatch evaluations
    pub async fn poll_once(&self) -> common::Result<PollSummary> {
        let started = Instant::now();
        let hosts = self.inventory.list_monitored_hosts().await?;

        let listed: HashSet<_> = hosts.iter().map(|h| h.id).collect();
        let mut summary = PollSummary {
            hosts: hosts.len(),
            pruned: self.cache.retain_hosts(&listed).await,
            ..Default::default()
        };

        for host in &hosts {
            let accepted = self.pool.submit(ServerStatusRecord::pending(host));
            if accepted {
                summary.submitted += 1;
            } else {
                summary.dropped += 1;
            }
            if let Some(ref metrics) = self.metrics {
                metrics.record_task_submission(accepted);
            }
        }

        if summary.dropped > 0 {
            warn!(
                dropped = summary.dropped,
                capacity = self.pool.capacity(),
                "Task queue full, evaluations deferred to next tick"
            );
        }
        if let Some(ref metrics) = self.metrics {
            metrics.record_poll_tick(summary.hosts, self.pool.queued(), started.elapsed());
        }

        debug!(?summary, "Poll tick dispatched");
        Ok(summary)
    }
}
