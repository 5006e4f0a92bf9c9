//! Turns the two network probes into a host status.

use crate::cache::StatusCache;
use crate::checkers::{
    DEFAULT_ICMP_TIMEOUT, DEFAULT_SERVICE_PORT, DEFAULT_SERVICE_TIMEOUT, NetworkChecker,
};
use crate::types::{HealthStatus, HostId, ServerStatusRecord};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Evaluation errors.
///
/// Probe failures are not errors; they end up as a [`HealthStatus`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvaluateError {
    #[error("host {0} has no network address")]
    MissingAddress(HostId),

    #[error("evaluation of host {0} was cancelled")]
    Cancelled(HostId),
}

/// Probe parameters shared by every evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Port of the monitored service (WinRM)
    pub service_port: u16,
    pub icmp_timeout: Duration,
    pub service_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            service_port: DEFAULT_SERVICE_PORT,
            icmp_timeout: DEFAULT_ICMP_TIMEOUT,
            service_timeout: DEFAULT_SERVICE_TIMEOUT,
        }
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub status: HealthStatus,
    /// Whether the cache recorded a status transition
    pub changed: bool,
    /// Whether the service probe ran
    pub service_probed: bool,
}

/// Evaluate one host and store the result in `cache`.
///
/// ICMP runs first; a host that fails it is `Unreachable` and the service
/// probe is skipped. Otherwise the service probe decides between `Ok` and
/// `Degraded`. When `cancel` fires mid-probe the evaluation is abandoned and
/// nothing is written.
pub async fn check_server_status(
    record: ServerStatusRecord,
    cache: &StatusCache,
    checker: &dyn NetworkChecker,
    settings: &ProbeSettings,
    cancel: &CancellationToken,
) -> Result<Evaluation, EvaluateError> {
    let host_id = record.host_id;
    let address = record.address.trim();
    if address.is_empty() {
        return Err(EvaluateError::MissingAddress(host_id));
    }

    let icmp = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EvaluateError::Cancelled(host_id)),
        ok = checker.check_icmp(address, settings.icmp_timeout) => ok,
    };

    let service = if icmp {
        let ok = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EvaluateError::Cancelled(host_id)),
            ok = checker.check_service(address, settings.service_port, settings.service_timeout) => ok,
        };
        Some(ok)
    } else {
        None
    };

    let status = HealthStatus::from_probes(icmp, service);
    debug!(host_id, address, icmp, ?service, %status, "Host evaluated");

    let changed = cache.set(record.with_status(status)).await;
    if changed {
        info!(host_id, owner_id = record.owner_id, %status, "Host status updated");
    }

    Ok(Evaluation {
        status,
        changed,
        service_probed: service.is_some(),
    })
}
