//! Prometheus metrics for the status server.

use crate::topic::StreamKind;
use healthcheck::{Evaluation, HealthStatus, ProbeKind};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for probe metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProbeLabels {
    /// Probe kind (icmp, service)
    pub probe: String,
    /// Result (success, failure)
    pub result: String,
}

/// Labels for status metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StatusLabels {
    /// Status (ok, degraded, unreachable)
    pub status: String,
}

/// Labels for status transition metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    /// Previous status, "none" for a first evaluation
    pub from: String,
    pub to: String,
}

/// Labels for publish metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PublishLabels {
    /// Stream kind (servers, services)
    pub kind: String,
    /// Result (success, failure)
    pub result: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error type (inventory, missing_address, cancelled, ...)
    pub error_type: String,
}

/// Metrics registry with all status server metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    probes_total: Family<ProbeLabels, Counter>,
    evaluations_total: Family<StatusLabels, Counter>,
    evaluation_duration_seconds: Histogram,
    status_transitions_total: Family<TransitionLabels, Counter>,

    tasks_submitted_total: Counter,
    tasks_dropped_total: Counter,
    monitored_hosts: Gauge,
    queued_tasks: Gauge,
    poll_tick_duration_seconds: Histogram,

    publishes_total: Family<PublishLabels, Counter>,
    subscribers_active: Gauge,

    errors_total: Family<ErrorLabels, Counter>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let probes_total = Family::<ProbeLabels, Counter>::default();
        registry.register(
            "winmon_probes",
            "Network probes performed",
            probes_total.clone(),
        );

        let evaluations_total = Family::<StatusLabels, Counter>::default();
        registry.register(
            "winmon_evaluations",
            "Host evaluations by resulting status",
            evaluations_total.clone(),
        );

        // 10ms to ~40s
        let evaluation_duration_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register(
            "winmon_evaluation_duration_seconds",
            "Duration of a host evaluation in seconds",
            evaluation_duration_seconds.clone(),
        );

        let status_transitions_total = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "winmon_status_transitions",
            "Host status transitions",
            status_transitions_total.clone(),
        );

        let tasks_submitted_total = Counter::default();
        registry.register(
            "winmon_tasks_submitted",
            "Evaluation tasks accepted by the worker pool",
            tasks_submitted_total.clone(),
        );

        let tasks_dropped_total = Counter::default();
        registry.register(
            "winmon_tasks_dropped",
            "Evaluation tasks dropped because the queue was full",
            tasks_dropped_total.clone(),
        );

        let monitored_hosts = Gauge::default();
        registry.register(
            "winmon_monitored_hosts",
            "Hosts listed by the last successful inventory poll",
            monitored_hosts.clone(),
        );

        let queued_tasks = Gauge::default();
        registry.register(
            "winmon_queued_tasks",
            "Evaluation tasks waiting in the queue after the last poll tick",
            queued_tasks.clone(),
        );

        let poll_tick_duration_seconds = Histogram::new(exponential_buckets(0.001, 2.0, 12));
        registry.register(
            "winmon_poll_tick_duration_seconds",
            "Duration of listing and dispatching one poll tick",
            poll_tick_duration_seconds.clone(),
        );

        let publishes_total = Family::<PublishLabels, Counter>::default();
        registry.register(
            "winmon_publishes",
            "Snapshots published to owner topics",
            publishes_total.clone(),
        );

        let subscribers_active = Gauge::default();
        registry.register(
            "winmon_subscribers_active",
            "Live streaming connections",
            subscribers_active.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "winmon_errors",
            "Total errors by type",
            errors_total.clone(),
        );

        Self {
            registry,
            probes_total,
            evaluations_total,
            evaluation_duration_seconds,
            status_transitions_total,
            tasks_submitted_total,
            tasks_dropped_total,
            monitored_hosts,
            queued_tasks,
            poll_tick_duration_seconds,
            publishes_total,
            subscribers_active,
            errors_total,
        }
    }

    fn record_probe(&self, kind: ProbeKind, success: bool) {
        self.probes_total
            .get_or_create(&ProbeLabels {
                probe: kind.as_str().to_string(),
                result: result_label(success),
            })
            .inc();
    }

    /// Record a finished evaluation and the probes it ran
    pub fn record_evaluation(&self, evaluation: &Evaluation, duration: Duration) {
        let icmp_ok = evaluation.status != HealthStatus::Unreachable;
        self.record_probe(ProbeKind::Icmp, icmp_ok);
        if evaluation.service_probed {
            self.record_probe(ProbeKind::Service, evaluation.status == HealthStatus::Ok);
        }

        self.evaluations_total
            .get_or_create(&StatusLabels {
                status: evaluation.status.as_str().to_string(),
            })
            .inc();
        self.evaluation_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record a status transition observed by the cache
    pub fn record_status_transition(&self, from: Option<HealthStatus>, to: HealthStatus) {
        self.status_transitions_total
            .get_or_create(&TransitionLabels {
                from: from.map_or("none", |s| s.as_str()).to_string(),
                to: to.as_str().to_string(),
            })
            .inc();
    }

    /// Record a task submission attempt
    pub fn record_task_submission(&self, accepted: bool) {
        if accepted {
            self.tasks_submitted_total.inc();
        } else {
            self.tasks_dropped_total.inc();
        }
    }

    /// Record one poll tick and the queue depth it left behind
    pub fn record_poll_tick(&self, hosts: usize, queued: usize, duration: Duration) {
        self.monitored_hosts.set(hosts as i64);
        self.queued_tasks.set(queued as i64);
        self.poll_tick_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record a publish attempt
    pub fn record_publish(&self, kind: StreamKind, success: bool) {
        self.publishes_total
            .get_or_create(&PublishLabels {
                kind: kind.as_str().to_string(),
                result: result_label(success),
            })
            .inc();
    }

    /// A streaming connection opened
    pub fn subscriber_connected(&self) {
        self.subscribers_active.inc();
    }

    /// A streaming connection closed
    pub fn subscriber_disconnected(&self) {
        self.subscribers_active.dec();
    }

    /// Record an error
    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .get_or_create(&ErrorLabels {
                error_type: error_type.to_string(),
            })
            .inc();
    }
}

fn result_label(success: bool) -> String {
    if success { "success" } else { "failure" }.to_string()
}
