//! Process-wide defaults. Mirrors the style of a small, flat constants module:
//! plain `pub const` declarations, no builder, no config struct.

use std::time::Duration;

/// Default HTTP port for `/healthz`, `/readyz`, `/metrics`.
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Minimum seconds between the start of two successful ticks (`update_interval_s`).
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 5;

/// Consecutive tick failures tolerated before the process exits.
pub const DEFAULT_MAX_FAILURES: u32 = 5;

/// Nodes requested from the provider per `create_node` call.
pub const DEFAULT_MAX_LAUNCH_BATCH: usize = 5;

/// Cluster-wide ceiling on concurrently in-flight launch requests.
pub const DEFAULT_MAX_CONCURRENT_LAUNCHES: usize = 10;

/// Seconds without a heartbeat before a node is considered unhealthy and
/// a recovery updater is dispatched (`AUTOSCALER_HEARTBEAT_TIMEOUT_S`).
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: i64 = 30;

/// How often the config file is re-read from disk, in ticks (every tick).
pub const CONFIG_REFRESH_EVERY_TICK: bool = true;

pub fn update_interval() -> Duration {
    Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS)
}

pub fn heartbeat_timeout() -> Duration {
    Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS.max(0) as u64)
}
