//! Read access to the inventory of owners, hosts and services.

use crate::config::InventorySettings;
use crate::types::{Owner, ServiceRecord};
use async_trait::async_trait;
use common::Result;
use healthcheck::{HostId, MonitoredHost, OwnerId};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Inventory store.
///
/// Hosts and services are created and edited elsewhere; the status engine
/// only reads them.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Every host under watch, across owners
    async fn list_monitored_hosts(&self) -> Result<Vec<MonitoredHost>>;

    /// Every known owner
    async fn list_owners(&self) -> Result<Vec<Owner>>;

    /// Service run states stored for `owner_id`'s hosts
    async fn list_services(&self, owner_id: OwnerId) -> Result<Vec<ServiceRecord>>;

    /// A host, if `owner_id` owns it
    async fn get_host(&self, owner_id: OwnerId, host_id: HostId) -> Result<Option<MonitoredHost>>;
}

#[derive(Default)]
struct Tables {
    owners: BTreeMap<OwnerId, Owner>,
    hosts: BTreeMap<HostId, MonitoredHost>,
    services: Vec<ServiceRecord>,
    next_service_id: i64,
}

/// Inventory held in memory, seeded from configuration
#[derive(Default)]
pub struct MemoryInventory {
    tables: RwLock<Tables>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inventory from the `inventory` configuration section
    pub fn from_settings(settings: &InventorySettings) -> Self {
        let inventory = Self::new();

        for owner in &settings.owners {
            inventory.add_owner(Owner {
                id: owner.id,
                name: owner.name.clone(),
            });
            for host in &owner.hosts {
                inventory.add_host(MonitoredHost::new(host.id, owner.id, host.address.clone()));
                for service in &host.services {
                    inventory.add_service(host.id, &service.name, &service.status);
                }
            }
        }

        inventory
    }

    pub fn add_owner(&self, owner: Owner) {
        self.tables.write().owners.insert(owner.id, owner);
    }

    /// Add or replace a host
    pub fn add_host(&self, host: MonitoredHost) {
        self.tables.write().hosts.insert(host.id, host);
    }

    /// Attach a service to a known host. Returns the new service ID.
    pub fn add_service(&self, host_id: HostId, name: &str, status: &str) -> Option<i64> {
        let mut tables = self.tables.write();
        let owner_id = tables.hosts.get(&host_id)?.owner_id;

        tables.next_service_id += 1;
        let id = tables.next_service_id;
        tables.services.push(ServiceRecord {
            id,
            host_id,
            owner_id,
            name: name.to_string(),
            status: status.to_string(),
        });

        Some(id)
    }
}

#[async_trait]
impl Inventory for MemoryInventory {
    async fn list_monitored_hosts(&self) -> Result<Vec<MonitoredHost>> {
        Ok(self.tables.read().hosts.values().cloned().collect())
    }

    async fn list_owners(&self) -> Result<Vec<Owner>> {
        Ok(self.tables.read().owners.values().cloned().collect())
    }

    async fn list_services(&self, owner_id: OwnerId) -> Result<Vec<ServiceRecord>> {
        Ok(self
            .tables
            .read()
            .services
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn get_host(&self, owner_id: OwnerId, host_id: HostId) -> Result<Option<MonitoredHost>> {
        Ok(self
            .tables
            .read()
            .hosts
            .get(&host_id)
            .filter(|h| h.owner_id == owner_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostSettings, OwnerSettings, ServiceSettings};

    fn settings() -> InventorySettings {
        InventorySettings {
            owners: vec![
                OwnerSettings {
                    id: 1,
                    name: "ops".to_string(),
                    hosts: vec![HostSettings {
                        id: 10,
                        address: "10.0.0.10".to_string(),
                        services: vec![
                            ServiceSettings {
                                name: "W3SVC".to_string(),
                                status: "Running".to_string(),
                            },
                            ServiceSettings {
                                name: "Spooler".to_string(),
                                status: "Stopped".to_string(),
                            },
                        ],
                    }],
                },
                OwnerSettings {
                    id: 2,
                    name: "dev".to_string(),
                    hosts: vec![HostSettings {
                        id: 20,
                        address: "dev-box".to_string(),
                        services: vec![],
                    }],
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_from_settings() {
        let inventory = MemoryInventory::from_settings(&settings());

        assert_eq!(inventory.list_owners().await.unwrap().len(), 2);
        let hosts = inventory.list_monitored_hosts().await.unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0], MonitoredHost::new(10, 1, "10.0.0.10"));

        let services = inventory.list_services(1).await.unwrap();
        assert_eq!(services.len(), 2);
        assert!(services.iter().all(|s| s.owner_id == 1 && s.host_id == 10));
        assert!(inventory.list_services(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_host_is_owner_scoped() {
        let inventory = MemoryInventory::from_settings(&settings());

        assert!(inventory.get_host(1, 10).await.unwrap().is_some());
        assert!(inventory.get_host(2, 10).await.unwrap().is_none());
        assert!(inventory.get_host(1, 99).await.unwrap().is_none());
    }

    #[test]
    fn test_service_on_unknown_host_rejected() {
        let inventory = MemoryInventory::new();
        assert!(inventory.add_service(1, "W3SVC", "Running").is_none());
    }
}
