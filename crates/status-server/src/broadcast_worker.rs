//! Periodic per-owner snapshot publishing.

use crate::broadcaster::{BroadcastError, Broadcaster};
use crate::inventory::Inventory;
use crate::metrics::MetricsRegistry;
use crate::topic::{StreamKind, topic_for};
use async_trait::async_trait;
use bytes::Bytes;
use healthcheck::{OwnerId, StatusCache};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Supplies the snapshot published to each owner's topic
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Stream kind of the topics this source feeds
    fn kind(&self) -> StreamKind;

    /// Current state of `owner_id`'s resources, as a JSON array
    async fn snapshot(&self, owner_id: OwnerId) -> common::Result<serde_json::Value>;
}

/// Host statuses, read from the status cache
pub struct ServerSnapshotSource {
    cache: Arc<StatusCache>,
}

impl ServerSnapshotSource {
    pub fn new(cache: Arc<StatusCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl SnapshotSource for ServerSnapshotSource {
    fn kind(&self) -> StreamKind {
        StreamKind::Servers
    }

    async fn snapshot(&self, owner_id: OwnerId) -> common::Result<serde_json::Value> {
        let records = self.cache.list_by_owner(owner_id).await;
        Ok(serde_json::to_value(records)?)
    }
}

/// Service run states, read from the inventory
pub struct ServiceSnapshotSource {
    inventory: Arc<dyn Inventory>,
}

impl ServiceSnapshotSource {
    pub fn new(inventory: Arc<dyn Inventory>) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl SnapshotSource for ServiceSnapshotSource {
    fn kind(&self) -> StreamKind {
        StreamKind::Services
    }

    async fn snapshot(&self, owner_id: OwnerId) -> common::Result<serde_json::Value> {
        let services = self.inventory.list_services(owner_id).await?;
        Ok(serde_json::to_value(services)?)
    }
}

/// Publishes every owner's snapshot on a fixed interval
pub struct StatusBroadcastWorker {
    inventory: Arc<dyn Inventory>,
    source: Arc<dyn SnapshotSource>,
    broadcaster: Arc<dyn Broadcaster>,
    interval: Duration,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl StatusBroadcastWorker {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        source: Arc<dyn SnapshotSource>,
        broadcaster: Arc<dyn Broadcaster>,
        interval: Duration,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            inventory,
            source,
            broadcaster,
            interval,
            metrics,
        }
    }

    /// Publish until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let kind = self.source.kind();
        info!(%kind, interval = ?self.interval, "Broadcast worker started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.broadcast_once().await {
                error!(%kind, error = %e, "Broadcast pass aborted");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_error("publish");
                }
            }
        }

        info!(%kind, "Broadcast worker stopped");
    }

    /// One pass over every owner. Returns the number of topics published.
    ///
    /// A failing snapshot skips that owner. A failing publish aborts the pass.
    pub async fn broadcast_once(&self) -> Result<usize, BroadcastError> {
        let kind = self.source.kind();

        let owners = match self.inventory.list_owners().await {
            Ok(owners) => owners,
            Err(e) => {
                warn!(%kind, error = %e, "Failed to list owners");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_error("inventory");
                }
                return Ok(0);
            }
        };

        let mut published = 0;
        for owner in owners {
            let snapshot = match self.source.snapshot(owner.id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(%kind, owner_id = owner.id, error = %e, "Skipping owner snapshot");
                    if let Some(ref metrics) = self.metrics {
                        metrics.record_error("snapshot");
                    }
                    continue;
                }
            };

            let payload = Bytes::from(serde_json::to_vec(&snapshot)?);
            let result = self.broadcaster.publish(&topic_for(owner.id, kind), payload);
            if let Some(ref metrics) = self.metrics {
                metrics.record_publish(kind, result.is_ok());
            }
            result?;
            published += 1;
        }

        debug!(%kind, published, "Broadcast pass complete");
        Ok(published)
    }
}
