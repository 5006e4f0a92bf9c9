//! Network probe implementations.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::net::Ipv6Addr;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Timeout used for ICMP probes when the caller passes a zero timeout
pub const DEFAULT_ICMP_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout used for service probes when the caller passes a zero timeout
pub const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(3);

/// WinRM HTTP listener port
pub const DEFAULT_SERVICE_PORT: u16 = 5985;

/// Kind of network probe, used for logging and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Icmp,
    Service,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Icmp => "icmp",
            ProbeKind::Service => "service",
        }
    }
}

/// Low-level reachability probes.
///
/// Both calls report failure as `false`: an unreachable, misbehaving or
/// unresolvable host is an expected outcome, not an error. Implementations
/// must return within the given timeout and must stop their work when the
/// returned future is dropped.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkChecker: Send + Sync {
    /// Check that `address` answers an ICMP echo request
    async fn check_icmp(&self, address: &str, timeout: Duration) -> bool;

    /// Check that the service listening on `address:port` answers its handshake
    async fn check_service(&self, address: &str, port: u16, timeout: Duration) -> bool;
}

/// Substitute `default` for a zero timeout
pub fn effective_timeout(requested: Duration, default: Duration) -> Duration {
    if requested.is_zero() { default } else { requested }
}

/// Format `address:port`, bracketing IPv6 literals
pub fn host_port(address: &str, port: u16) -> String {
    match address.parse::<Ipv6Addr>() {
        Ok(ip) => format!("[{}]:{}", ip, port),
        Err(_) => format!("{}:{}", address, port),
    }
}

/// Whether an HTTP status returned by `/wsman` proves a WinRM listener.
///
/// An anonymous WS-Management request is normally rejected with 401, or with
/// 405/415 by listeners that refuse the method or an empty envelope.
pub fn is_wsman_response(status: StatusCode) -> bool {
    status.is_success()
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::METHOD_NOT_ALLOWED
        || status == StatusCode::UNSUPPORTED_MEDIA_TYPE
}

/// Addresses reach the `ping` command line, so anything resembling an
/// option or containing whitespace is refused.
fn is_probeable_address(address: &str) -> bool {
    !address.is_empty()
        && !address.starts_with('-')
        && !address.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Probes backed by the platform `ping` binary and a WinRM HTTP exchange
pub struct SystemChecker {
    client: reqwest::Client,
}

impl SystemChecker {
    /// Create a new system checker
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_SERVICE_TIMEOUT)
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self { client })
    }

    fn ping_command(address: &str, timeout_duration: Duration) -> Command {
        let mut cmd = Command::new("ping");

        #[cfg(windows)]
        {
            let millis = timeout_duration.as_millis().max(1);
            cmd.args(["-n", "1", "-w", &millis.to_string(), address]);
        }

        #[cfg(not(windows))]
        {
            let secs = timeout_duration.as_secs().max(1);
            cmd.args(["-c", "1", "-W", &secs.to_string(), address]);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl NetworkChecker for SystemChecker {
    async fn check_icmp(&self, address: &str, timeout_duration: Duration) -> bool {
        let timeout_duration = effective_timeout(timeout_duration, DEFAULT_ICMP_TIMEOUT);

        if !is_probeable_address(address) {
            warn!(address, "Refusing to ping malformed address");
            return false;
        }

        let start = Instant::now();
        let mut cmd = Self::ping_command(address, timeout_duration);

        match timeout(timeout_duration, cmd.status()).await {
            Ok(Ok(status)) => {
                debug!(
                    address,
                    success = status.success(),
                    duration_ms = start.elapsed().as_millis(),
                    "ICMP probe finished"
                );
                status.success()
            }
            Ok(Err(e)) => {
                warn!(address, error = %e, "Failed to run ping");
                false
            }
            Err(_) => {
                debug!(address, "ICMP probe timed out");
                false
            }
        }
    }

    async fn check_service(&self, address: &str, port: u16, timeout_duration: Duration) -> bool {
        let timeout_duration = effective_timeout(timeout_duration, DEFAULT_SERVICE_TIMEOUT);

        if !is_probeable_address(address) {
            warn!(address, "Refusing to probe malformed address");
            return false;
        }

        let start = Instant::now();
        let url = format!("http://{}/wsman", host_port(address, port));
        let request = self
            .client
            .post(&url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/soap+xml;charset=UTF-8",
            )
            .timeout(timeout_duration);

        match timeout(timeout_duration, request.send()).await {
            Ok(Ok(response)) => {
                let status = response.status();
                let answered = is_wsman_response(status);
                debug!(
                    url = %url,
                    status = status.as_u16(),
                    answered,
                    duration_ms = start.elapsed().as_millis(),
                    "Service probe finished"
                );
                answered
            }
            Ok(Err(e)) => {
                debug!(url = %url, error = %e, "Service probe failed");
                false
            }
            Err(_) => {
                debug!(url = %url, "Service probe timed out");
                false
            }
        }
    }
}
