//! Health evaluation of remote Windows hosts.
//!
//! This crate provides the building blocks of the Winmon status engine:
//! - Network probes: ICMP reachability and a WinRM service handshake
//! - A concurrent status cache that elides no-op writes
//! - The evaluator that combines both probes into a tri-state status
//!
//! # Example
//!
//! ```no_run
//! use healthcheck::{
//!     MonitoredHost, ProbeSettings, ServerStatusRecord, StatusCache, SystemChecker,
//!     check_server_status,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = StatusCache::new();
//! let checker = SystemChecker::new()?;
//! let host = MonitoredHost::new(1, 42, "10.0.0.1");
//!
//! let evaluation = check_server_status(
//!     ServerStatusRecord::pending(&host),
//!     &cache,
//!     &checker,
//!     &ProbeSettings::default(),
//!     &CancellationToken::new(),
//! )
//! .await?;
//!
//! println!("host 1 is {}", evaluation.status);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod checkers;
pub mod evaluator;
pub mod types;

pub use cache::StatusCache;
pub use checkers::{NetworkChecker, ProbeKind, SystemChecker};
pub use evaluator::{EvaluateError, Evaluation, ProbeSettings, check_server_status};
pub use types::{HealthStatus, HostId, MonitoredHost, OwnerId, ServerStatusRecord, StatusChange};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Ok.to_string(), "OK");
        assert_eq!(HealthStatus::Degraded.to_string(), "DEGRADED");
        assert_eq!(HealthStatus::Unreachable.to_string(), "UNREACHABLE");
    }

    #[test]
    fn test_health_status_severity_order() {
        assert!(HealthStatus::Ok < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Unreachable);
    }

    #[test]
    fn test_record_serialization() {
        let host = MonitoredHost::new(1, 7, "10.0.0.1");
        let record = ServerStatusRecord::pending(&host).with_status(HealthStatus::Degraded);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["host_id"], 1);
        assert_eq!(json["owner_id"], 7);
        assert_eq!(json["status"], "degraded");

        let pending = serde_json::to_value(ServerStatusRecord::pending(&host)).unwrap();
        assert!(pending["status"].is_null());
    }
}
