//! Status reporter: renders a human-readable cluster summary and publishes
//! it to a debug KV sink under two well-known keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

pub const KEY_AUTOSCALING_STATUS: &str = "DEBUG_AUTOSCALING_STATUS";
pub const KEY_AUTOSCALING_ERROR: &str = "DEBUG_AUTOSCALING_ERROR";

/// A key-value sink the reconciler publishes status/error strings to.
/// Written only when the sink is initialized.
#[async_trait::async_trait]
pub trait DebugSink: Send + Sync {
    async fn put(&self, key: &str, value: String);
    async fn get(&self, key: &str) -> Option<String>;
}

/// In-process reference implementation, also used to back `GET /status` and
/// `fleetctl status` so both surfaces see identical data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDebugSink {
    values: Arc<RwLock<BTreeMap<String, String>>>,
}

impl InMemoryDebugSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DebugSink for InMemoryDebugSink {
    async fn put(&self, key: &str, value: String) {
        self.values.write().await.insert(key.to_string(), value);
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.values.read().await.get(key).cloned()
    }
}

/// `log_info_string`/`info_string`: combines node count, in-flight updaters
/// and failures, and the load-metrics summary into one status line.
pub fn build_status_string(
    node_count: usize,
    updater_count: usize,
    failed_update_count: usize,
    load_metrics_info: &str,
) -> String {
    format!(
        "{node_count} node(s); {updater_count} updater(s) in flight, {failed_update_count} failed update(s); {load_metrics_info}"
    )
}
