//! Integration tests for process composition and bounded shutdown

use async_trait::async_trait;
use healthcheck::{HostId, MonitoredHost, NetworkChecker, OwnerId};
use status_server::{
    Inventory, MemoryInventory, Owner, ServerConfig, ServiceRecord, StatusServer, issue_token,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const SECRET: &str = "integration-test-secret";

struct HealthyChecker;

#[async_trait]
impl NetworkChecker for HealthyChecker {
    async fn check_icmp(&self, _address: &str, _timeout: Duration) -> bool {
        true
    }

    async fn check_service(&self, _address: &str, _port: u16, _timeout: Duration) -> bool {
        true
    }
}

/// Inventory answering its first `answers` host listings, then never again
struct StallingInventory {
    answers: AtomicUsize,
}

#[async_trait]
impl Inventory for StallingInventory {
    async fn list_monitored_hosts(&self) -> common::Result<Vec<MonitoredHost>> {
        let remaining = self.answers.load(Ordering::SeqCst);
        if remaining == 0 {
            futures::future::pending::<()>().await;
        }
        self.answers.store(remaining - 1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn list_owners(&self) -> common::Result<Vec<Owner>> {
        Ok(Vec::new())
    }

    async fn list_services(&self, _owner_id: OwnerId) -> common::Result<Vec<ServiceRecord>> {
        Ok(Vec::new())
    }

    async fn get_host(
        &self,
        _owner_id: OwnerId,
        _host_id: HostId,
    ) -> common::Result<Option<MonitoredHost>> {
        Ok(None)
    }
}

fn config(shutdown_timeout: Duration) -> ServerConfig {
    ServerConfig {
        poll_interval: Duration::from_millis(20),
        pool_workers: 2,
        broadcast_interval: Duration::from_millis(20),
        jwt_secret: SECRET.to_string(),
        shutdown_timeout,
        ..Default::default()
    }
}

async fn local_listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

/// Read from `stream` until `needle` shows up in everything read so far
async fn read_until(stream: &mut TcpStream, received: &mut Vec<u8>, needle: &str) {
    let mut chunk = [0u8; 1024];
    while !String::from_utf8_lossy(received).contains(needle) {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before {needle:?} arrived");
        received.extend_from_slice(&chunk[..n]);
    }
}

#[tokio::test]
async fn test_shutdown_ends_live_streams() {
    let inventory = MemoryInventory::new();
    inventory.add_owner(Owner {
        id: 1,
        name: "ops".to_string(),
    });
    inventory.add_host(MonitoredHost::new(1, 1, "10.0.0.1"));

    let shutdown_timeout = Duration::from_secs(5);
    let server = StatusServer::new(
        config(shutdown_timeout),
        Arc::new(inventory),
        Arc::new(HealthyChecker),
    );

    let listener = local_listener().await;
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.serve(listener, cancel.clone()));

    let token = issue_token(1, "tester", 300, SECRET).unwrap();
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            format!(
                "GET /api/events?stream=servers HTTP/1.1\r\nHost: {addr}\r\nAuthorization: Bearer {token}\r\n\r\n"
            )
            .as_bytes(),
        )
        .await
        .unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(
        Duration::from_secs(2),
        read_until(&mut stream, &mut received, "data: "),
    )
    .await
    .expect("no snapshot streamed");
    assert!(received.starts_with(b"HTTP/1.1 200 OK"));

    let started = Instant::now();
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("server did not stop while a stream was open")
        .unwrap()
        .unwrap();
    assert!(started.elapsed() < shutdown_timeout);

    // The server hung up on the subscriber
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(1), stream.read_to_end(&mut rest))
        .await
        .expect("stream still open after shutdown")
        .ok();
}

#[tokio::test]
async fn test_stuck_loop_does_not_block_shutdown() {
    // Warm-up gets an answer, the poller's first listing never does
    let inventory = Arc::new(StallingInventory {
        answers: AtomicUsize::new(1),
    });
    let shutdown_timeout = Duration::from_millis(300);
    let server = StatusServer::new(config(shutdown_timeout), inventory, Arc::new(HealthyChecker));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.serve(local_listener().await, cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("server waited past its shutdown timeout")
        .unwrap()
        .unwrap();
    assert!(started.elapsed() >= shutdown_timeout);
}

#[tokio::test]
async fn test_cancel_during_warm_up() {
    let inventory = Arc::new(StallingInventory {
        answers: AtomicUsize::new(0),
    });
    let server = StatusServer::new(
        config(Duration::from_secs(5)),
        inventory,
        Arc::new(HealthyChecker),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.serve(local_listener().await, cancel.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("warm-up ignored cancellation")
        .unwrap()
        .unwrap();
}
