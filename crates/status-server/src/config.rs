//! Configuration loading and validation for the status server

use crate::types::ServerConfig;
use healthcheck::ProbeSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Environment variable overriding `auth.jwt_secret`
pub const JWT_SECRET_ENV: &str = "WINMON_JWT_SECRET";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub broadcast: BroadcastSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub shutdown: ShutdownSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub inventory: InventorySettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.server.validate()?;
        self.polling.validate()?;
        self.probe.validate()?;
        self.broadcast.validate()?;
        self.auth.validate()?;
        self.inventory.validate()?;
        Ok(())
    }
}

/// Server-level settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerSettings {
    #[validate(length(min = 1))]
    pub listen_addr: String,

    pub metrics_enabled: bool,
}

/// Inventory polling and probe pool settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PollingSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_poll_interval")]
    pub interval: Duration,

    #[validate(range(min = 1, max = 1024))]
    pub workers: usize,

    #[validate(range(min = 1, max = 100))]
    pub backlog_multiplier: usize,
}

/// Probe settings. Zero timeouts select the probe defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProbeConfig {
    #[validate(range(min = 1))]
    pub service_port: u16,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub icmp_timeout: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub service_timeout: Duration,
}

/// Snapshot broadcast settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BroadcastSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_broadcast_interval")]
    pub interval: Duration,

    #[validate(range(min = 1, max = 65536))]
    pub channel_capacity: usize,

    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
}

/// Stream credential settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthSettings {
    #[validate(length(min = 16))]
    pub jwt_secret: String,

    #[validate(length(min = 1))]
    pub cookie_name: String,
}

/// Shutdown settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// Static inventory served by the in-memory store
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct InventorySettings {
    #[serde(default)]
    #[validate(custom = "validate_owners")]
    pub owners: Vec<OwnerSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerSettings {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub hosts: Vec<HostSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    pub id: i64,
    pub address: String,
    #[serde(default)]
    pub services: Vec<ServiceSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub name: String,
    #[serde(default = "default_service_status")]
    pub status: String,
}

fn default_service_status() -> String {
    "Unknown".to_string()
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            metrics_enabled: true,
        }
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            workers: 10,
            backlog_multiplier: 4,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        let defaults = ProbeSettings::default();
        Self {
            service_port: defaults.service_port,
            icmp_timeout: defaults.icmp_timeout,
            service_timeout: defaults.service_timeout,
        }
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            channel_capacity: 64,
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            cookie_name: "token".to_string(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

// Custom validators

fn validate_poll_interval(interval: &Duration) -> Result<(), ValidationError> {
    if *interval < Duration::from_secs(1) || *interval > Duration::from_secs(3600) {
        return Err(ValidationError::new("poll_interval_out_of_range"));
    }
    Ok(())
}

fn validate_broadcast_interval(interval: &Duration) -> Result<(), ValidationError> {
    if *interval < Duration::from_millis(100) || *interval > Duration::from_secs(3600) {
        return Err(ValidationError::new("broadcast_interval_out_of_range"));
    }
    Ok(())
}

fn validate_probe_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    if *timeout > Duration::from_secs(60) {
        return Err(ValidationError::new("probe_timeout_too_large"));
    }
    Ok(())
}

fn validate_owners(owners: &Vec<OwnerSettings>) -> Result<(), ValidationError> {
    let mut owner_ids = HashSet::new();
    let mut host_ids = HashSet::new();

    for owner in owners {
        if owner.id <= 0 {
            return Err(ValidationError::new("owner_id_not_positive"));
        }
        if !owner_ids.insert(owner.id) {
            return Err(ValidationError::new("owner_id_duplicate"));
        }

        for host in &owner.hosts {
            if host.address.trim().is_empty() {
                return Err(ValidationError::new("host_address_empty"));
            }
            if !host_ids.insert(host.id) {
                return Err(ValidationError::new("host_id_duplicate"));
            }
        }
    }

    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::parse_file(&path)?
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::parse_file(path.as_ref())?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var(JWT_SECRET_ENV) {
            if !secret.is_empty() {
                self.auth.jwt_secret = secret;
            }
        }
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/winmon/status-server.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./status-server.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/winmon/status-server.yaml"))
    }

    /// Convert to the runtime ServerConfig
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            listen_addr: self.server.listen_addr.clone(),
            poll_interval: self.polling.interval,
            pool_workers: self.polling.workers,
            backlog_multiplier: self.polling.backlog_multiplier,
            probe: ProbeSettings {
                service_port: self.probe.service_port,
                icmp_timeout: self.probe.icmp_timeout,
                service_timeout: self.probe.service_timeout,
            },
            broadcast_interval: self.broadcast.interval,
            broadcast_channel_capacity: self.broadcast.channel_capacity,
            keep_alive: self.broadcast.keep_alive,
            jwt_secret: self.auth.jwt_secret.clone(),
            cookie_name: self.auth.cookie_name.clone(),
            shutdown_timeout: self.shutdown.timeout,
            metrics_enabled: self.server.metrics_enabled,
        }
    }
}
