//! In-memory store of the last known status of every monitored host.

use crate::types::{HostId, MonitoredHost, OwnerId, ServerStatusRecord, StatusChange};
use std::collections::{HashMap, HashSet};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

/// Default buffer of the change notification channel
pub const DEFAULT_CHANGE_CAPACITY: usize = 256;

#[derive(Default)]
struct Entries {
    records: HashMap<HostId, ServerStatusRecord>,
    /// Hosts removed by [`StatusCache::retain_hosts`]; late writes for them are dropped
    pruned: HashSet<HostId>,
}

/// Concurrent status cache keyed by host ID.
///
/// A single reader/writer lock guards the map. Writes that would not change a
/// host's status are elided and never produce a [`StatusChange`].
pub struct StatusCache {
    entries: RwLock<Entries>,
    changes: broadcast::Sender<StatusChange>,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::with_change_capacity(DEFAULT_CHANGE_CAPACITY)
    }

    /// Create an empty cache whose change channel buffers `capacity` events
    pub fn with_change_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: RwLock::new(Entries::default()),
            changes,
        }
    }

    /// Subscribe to effective status transitions
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    /// Store a record.
    ///
    /// Returns `true` when the host's status changed. When the incoming status
    /// equals the stored one, or is absent, the stored status is kept: address
    /// and owner are refreshed if they differ, but no change is announced.
    /// Writes for hosts pruned by [`retain_hosts`](Self::retain_hosts) are
    /// dropped until the host is listed again.
    pub async fn set(&self, record: ServerStatusRecord) -> bool {
        let mut entries = self.entries.write().await;
        if entries.pruned.contains(&record.host_id) {
            debug!(host_id = record.host_id, "Dropping write for pruned host");
            return false;
        }

        let previous = match entries.records.get_mut(&record.host_id) {
            Some(existing) if record.status.is_none() || existing.status == record.status => {
                let status = existing.status;
                *existing = ServerStatusRecord { status, ..record };
                return false;
            }
            Some(existing) => {
                let previous = existing.status;
                *existing = record.clone();
                previous
            }
            None => {
                entries.records.insert(record.host_id, record.clone());
                None
            }
        };

        let Some(current) = record.status else {
            return false;
        };

        debug!(host_id = record.host_id, ?previous, %current, "Host status changed");

        // Sent under the lock so subscribers see transitions in write order
        let _ = self.changes.send(StatusChange {
            host_id: record.host_id,
            owner_id: record.owner_id,
            previous,
            current,
        });

        true
    }

    /// Register hosts that are not cached yet, with no status.
    ///
    /// Existing records are left untouched. Returns the number inserted.
    pub async fn warm<'a>(&self, hosts: impl IntoIterator<Item = &'a MonitoredHost>) -> usize {
        let mut entries = self.entries.write().await;
        let Entries { records, pruned } = &mut *entries;
        let mut inserted = 0;

        for host in hosts {
            pruned.remove(&host.id);
            records.entry(host.id).or_insert_with(|| {
                inserted += 1;
                ServerStatusRecord::pending(host)
            });
        }

        inserted
    }

    /// Get the record of a host
    pub async fn get(&self, host_id: HostId) -> Option<ServerStatusRecord> {
        self.entries.read().await.records.get(&host_id).cloned()
    }

    /// Remove a host. Removing an unknown host is a no-op.
    pub async fn delete(&self, host_id: HostId) -> Option<ServerStatusRecord> {
        self.entries.write().await.records.remove(&host_id)
    }

    /// Keep only the hosts in `listed`. Returns the number removed.
    ///
    /// Removed hosts stay pruned, so an evaluation that was already running
    /// cannot bring them back, until a later call lists them again.
    pub async fn retain_hosts(&self, listed: &HashSet<HostId>) -> usize {
        let mut entries = self.entries.write().await;
        let Entries { records, pruned } = &mut *entries;

        pruned.retain(|id| !listed.contains(id));

        let before = records.len();
        records.retain(|id, _| {
            let keep = listed.contains(id);
            if !keep {
                debug!(host_id = *id, "Host left the inventory");
                pruned.insert(*id);
            }
            keep
        });

        before - records.len()
    }

    /// All records belonging to `owner_id`, ordered by host ID
    pub async fn list_by_owner(&self, owner_id: OwnerId) -> Vec<ServerStatusRecord> {
        let mut owned: Vec<_> = self
            .entries
            .read()
            .await
            .records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();

        owned.sort_by_key(|r| r.host_id);
        owned
    }

    /// Number of cached hosts
    pub async fn len(&self) -> usize {
        self.entries.read().await.records.len()
    }

    /// Whether the cache holds no hosts
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.records.is_empty()
    }
}
