//! Winmon status server.
//!
//! Keeps the health of remote Windows hosts current and streams it to the
//! owners of those hosts.
//!
//! # Architecture
//!
//! - **ServerStatusWorker**: lists monitored hosts every poll interval and
//!   fans one evaluation per host out to a bounded worker pool
//! - **WorkerPool**: fixed set of workers draining a bounded queue; a full
//!   queue drops the task until the next tick
//! - **StatusBroadcastWorker**: publishes each owner's snapshot to the
//!   owner's topic on a fixed interval
//! - **SseBroadcaster**: topic-scoped server-sent event streams, gated by a
//!   JWT-based topic resolver
//!
//! Probing and the status cache live in the `healthcheck` crate.

pub mod broadcast_worker;
pub mod broadcaster;
pub mod config;
pub mod http_server;
pub mod inventory;
pub mod metrics;
pub mod poller;
pub mod pool;
pub mod server;
pub mod topic;
pub mod types;

pub use broadcast_worker::{
    ServerSnapshotSource, ServiceSnapshotSource, SnapshotSource, StatusBroadcastWorker,
};
pub use broadcaster::{BroadcastError, Broadcaster, SseBroadcaster};
pub use config::{Config, ConfigError};
pub use http_server::{AppState, HttpServer, router};
pub use inventory::{Inventory, MemoryInventory};
pub use metrics::MetricsRegistry;
pub use poller::{PollSummary, ServerStatusWorker};
pub use pool::{PoolError, TaskHandler, WorkerPool};
pub use server::{ServerError, StatusServer};
pub use topic::{
    Claims, JwtTopicResolver, StreamKind, TopicError, TopicResolver, issue_token, topic_for,
    validate_and_extract_claims,
};
pub use types::{Owner, ServerConfig, ServiceRecord};
