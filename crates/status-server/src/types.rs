//! Shared types for the status server.

use healthcheck::{HostId, OwnerId, ProbeSettings};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration handed to every component
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub listen_addr: String,

    /// Interval between inventory polls
    pub poll_interval: Duration,

    /// Number of probe workers
    pub pool_workers: usize,

    /// Task queue capacity per worker
    pub backlog_multiplier: usize,

    /// Probe port and timeouts
    pub probe: ProbeSettings,

    /// Interval between snapshot broadcasts
    pub broadcast_interval: Duration,

    /// Per-topic buffer of the SSE broadcaster
    pub broadcast_channel_capacity: usize,

    /// SSE keep-alive interval
    pub keep_alive: Duration,

    /// HMAC secret of stream credentials
    pub jwt_secret: String,

    /// Cookie carrying the credential
    pub cookie_name: String,

    /// Upper bound on graceful shutdown
    pub shutdown_timeout: Duration,

    /// Whether to record and expose Prometheus metrics
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            poll_interval: Duration::from_secs(30),
            pool_workers: 10,
            backlog_multiplier: 4,
            probe: ProbeSettings::default(),
            broadcast_interval: Duration::from_secs(5),
            broadcast_channel_capacity: 64,
            keep_alive: Duration::from_secs(15),
            jwt_secret: String::new(),
            cookie_name: "token".to_string(),
            shutdown_timeout: Duration::from_secs(10),
            metrics_enabled: true,
        }
    }
}

/// A user owning monitored hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: OwnerId,
    pub name: String,
}

/// Last stored run state of a Windows service on a monitored host.
///
/// Written by the remote service-state checker; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: i64,
    pub host_id: HostId,
    pub owner_id: OwnerId,
    pub name: String,
    pub status: String,
}
