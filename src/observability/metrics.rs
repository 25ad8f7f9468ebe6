//! Prometheus metrics, registered once behind `LazyLock` statics.

use std::sync::LazyLock;

use prometheus::{IntCounter, IntGauge, Registry};

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static TICKS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("fleet_autoscaler_ticks_total", "Total reconciler ticks run")
        .expect("failed to create TICKS metric - this should never happen");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("failed to register TICKS metric");
    counter
});

pub static TICK_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "fleet_autoscaler_tick_failures_total",
        "Ticks that failed and were counted toward the failure budget",
    )
    .expect("failed to create TICK_FAILURES metric - this should never happen");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("failed to register TICK_FAILURES metric");
    counter
});

pub static NODES_LAUNCH_REQUESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "fleet_autoscaler_nodes_launch_requested_total",
        "Nodes requested from the provider across all ticks",
    )
    .expect("failed to create NODES_LAUNCH_REQUESTED metric - this should never happen");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("failed to register NODES_LAUNCH_REQUESTED metric");
    counter
});

pub static NODES_TERMINATED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("fleet_autoscaler_nodes_terminated_total", "Nodes terminated across all ticks")
        .expect("failed to create NODES_TERMINATED metric - this should never happen");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("failed to register NODES_TERMINATED metric");
    counter
});

pub static UPDATERS_DISPATCHED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("fleet_autoscaler_updaters_dispatched_total", "Updater tasks dispatched")
        .expect("failed to create UPDATERS_DISPATCHED metric - this should never happen");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("failed to register UPDATERS_DISPATCHED metric");
    counter
});

pub static RECOVERIES_DISPATCHED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "fleet_autoscaler_recoveries_dispatched_total",
        "Recovery updaters dispatched due to heartbeat timeout",
    )
    .expect("failed to create RECOVERIES_DISPATCHED metric - this should never happen");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("failed to register RECOVERIES_DISPATCHED metric");
    counter
});

pub static PENDING_LAUNCHES: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("fleet_autoscaler_pending_launches", "Nodes requested but not yet observed")
        .expect("failed to create PENDING_LAUNCHES metric - this should never happen");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("failed to register PENDING_LAUNCHES metric");
    gauge
});

/// Forces registration of every metric above, so `/metrics` isn't empty
/// before the first tick runs.
pub fn register_all() {
    LazyLock::force(&TICKS);
    LazyLock::force(&TICK_FAILURES);
    LazyLock::force(&NODES_LAUNCH_REQUESTED);
    LazyLock::force(&NODES_TERMINATED);
    LazyLock::force(&UPDATERS_DISPATCHED);
    LazyLock::force(&RECOVERIES_DISPATCHED);
    LazyLock::force(&PENDING_LAUNCHES);
}

pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}
