//! Launch pool: a fixed pool of tokio tasks consuming launch requests
//! from a shared FIFO queue, each calling the provider's `create_node`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::model::tag;
use crate::provider::NodeProvider;

#[derive(Debug, Clone)]
struct LaunchQueueItem {
    node_config: serde_json::Value,
    batch_size: usize,
    node_type: String,
    launch_hash: String,
}

/// Shared, lock-guarded breakdown of in-flight launch counts by node type.
/// Incremented eagerly by `launch_new_node`, decremented by pool workers on
/// completion — whether the launch succeeded or failed.
#[derive(Debug, Clone, Default)]
pub struct PendingLaunches {
    inner: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl PendingLaunches {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn increment(&self, node_type: &str, count: usize) {
        let mut map = self.inner.lock().await;
        *map.entry(node_type.to_string()).or_insert(0) += count;
    }

    pub async fn decrement(&self, node_type: &str, count: usize) {
        let mut map = self.inner.lock().await;
        if let Some(existing) = map.get_mut(node_type) {
            *existing = existing.saturating_sub(count);
        }
    }

    pub async fn breakdown(&self) -> BTreeMap<String, usize> {
        self.inner.lock().await.clone()
    }
}

#[derive(Debug, Clone)]
pub struct LaunchPool {
    sender: mpsc::UnboundedSender<LaunchQueueItem>,
    pending: PendingLaunches,
    max_launch_batch: usize,
}

impl LaunchPool {
    /// Spawns `ceil(max_concurrent_launches / max_launch_batch)` daemonized
    /// worker tasks reading from a shared queue.
    pub fn spawn(
        provider: Arc<dyn NodeProvider>,
        max_concurrent_launches: usize,
        max_launch_batch: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<LaunchQueueItem>();
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = PendingLaunches::new();

        let worker_count = max_concurrent_launches.div_ceil(max_launch_batch.max(1)).max(1);
        for worker_id in 0..worker_count {
            let provider = Arc::clone(&provider);
            let receiver = Arc::clone(&receiver);
            let pending = pending.clone();
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(item) = item else {
                        break;
                    };
                    tracing::debug!(worker_id, node_type = %item.node_type, batch_size = item.batch_size, "launch pool dequeued batch");
                    match provider
                        .create_node(&item.node_type, &item.node_config, item.batch_size)
                        .await
                    {
                        Ok(created) => {
                            let mut tags = BTreeMap::new();
                            tags.insert(tag::NODE_KIND.to_string(), "worker".to_string());
                            tags.insert(tag::USER_NODE_TYPE.to_string(), item.node_type.clone());
                            tags.insert(tag::LAUNCH_CONFIG.to_string(), item.launch_hash.clone());
                            for node_id in &created {
                                if let Err(error) = provider.set_node_tags(node_id, &tags).await {
                                    tracing::warn!(%node_id, %error, "failed to tag newly launched node");
                                }
                            }
                        }
                        Err(error) => {
                            tracing::warn!(node_type = %item.node_type, %error, "create_node failed");
                        }
                    }
                    pending.decrement(&item.node_type, item.batch_size).await;
                }
            });
        }

        Self {
            sender,
            pending,
            max_launch_batch: max_launch_batch.max(1),
        }
    }

    pub fn pending_launches(&self) -> &PendingLaunches {
        &self.pending
    }

    /// `launch_new_node(count, type)`: increments `pending_launches`
    /// eagerly, then splits into batches of at most `max_launch_batch`.
    /// `launch_hash` is written onto each created node as its
    /// `RAY_LAUNCH_CONFIG` tag so the next tick's `launch_config_ok` check
    /// recognizes the node as current.
    pub async fn launch_new_node(
        &self,
        node_type: &str,
        node_config: &serde_json::Value,
        count: usize,
        launch_hash: &str,
    ) {
        if count == 0 {
            return;
        }
        self.pending.increment(node_type, count).await;

        let mut remaining = count;
        while remaining > 0 {
            let batch_size = remaining.min(self.max_launch_batch);
            remaining -= batch_size;
            let item = LaunchQueueItem {
                node_config: node_config.clone(),
                batch_size,
                node_type: node_type.to_string(),
                launch_hash: launch_hash.to_string(),
            };
            if self.sender.send(item).is_err() {
                tracing::error!("launch pool queue closed, dropping launch request");
                break;
            }
        }
    }
}
