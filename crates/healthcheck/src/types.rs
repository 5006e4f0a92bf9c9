//! Health check types and structures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a monitored host
pub type HostId = i64;

/// Identifier of the user owning a set of hosts
pub type OwnerId = i64;

/// Health status of a monitored host.
///
/// Variants are ordered by severity, `Ok` being the least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Host answers ICMP and the monitored service answers its handshake
    Ok,
    /// Host answers ICMP but the monitored service does not
    Degraded,
    /// Host does not answer ICMP
    Unreachable,
}

impl HealthStatus {
    /// Combine the two probe signals into a status.
    ///
    /// `service` is `None` when the service probe was skipped, which only
    /// happens for hosts that failed ICMP.
    pub fn from_probes(icmp: bool, service: Option<bool>) -> Self {
        match (icmp, service) {
            (false, _) => HealthStatus::Unreachable,
            (true, Some(true)) => HealthStatus::Ok,
            (true, _) => HealthStatus::Degraded,
        }
    }

    /// Lowercase label, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Ok => write!(f, "OK"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unreachable => write!(f, "UNREACHABLE"),
        }
    }
}

/// A remote Windows server under watch, as listed by the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredHost {
    pub id: HostId,
    pub owner_id: OwnerId,
    /// Hostname or IP address
    pub address: String,
}

impl MonitoredHost {
    pub fn new(id: HostId, owner_id: OwnerId, address: impl Into<String>) -> Self {
        Self {
            id,
            owner_id,
            address: address.into(),
        }
    }
}

/// Last known status of a monitored host.
///
/// `status` is `None` while the host has been registered (cache warm-up) but
/// not yet evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatusRecord {
    pub host_id: HostId,
    pub owner_id: OwnerId,
    pub address: String,
    pub status: Option<HealthStatus>,
}

impl ServerStatusRecord {
    /// Record for a host that has not been evaluated yet
    pub fn pending(host: &MonitoredHost) -> Self {
        Self {
            host_id: host.id,
            owner_id: host.owner_id,
            address: host.address.clone(),
            status: None,
        }
    }

    /// Copy of this record carrying `status`
    pub fn with_status(&self, status: HealthStatus) -> Self {
        Self {
            status: Some(status),
            ..self.clone()
        }
    }
}

impl From<&MonitoredHost> for ServerStatusRecord {
    fn from(host: &MonitoredHost) -> Self {
        Self::pending(host)
    }
}

/// An effective status transition observed by the status cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub host_id: HostId,
    pub owner_id: OwnerId,
    pub previous: Option<HealthStatus>,
    pub current: HealthStatus,
}
