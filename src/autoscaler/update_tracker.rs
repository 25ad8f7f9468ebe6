//! Update tracker: the `updaters` map and the dedup / failure-memory
//! rules in `can_update`. Confined to the reconciler's owning task — no
//! locking required.

use std::collections::BTreeMap;

use crate::autoscaler::predicates::launch_config_ok;
use crate::model::{ClusterConfig, NodeId, NodeSnapshot};
use crate::updater::UpdaterHandle;

#[derive(Debug, Default)]
pub struct UpdateTracker {
    updaters: BTreeMap<NodeId, UpdaterHandle>,
    num_failed_updates: BTreeMap<NodeId, u32>,
    num_successful_updates: BTreeMap<NodeId, u32>,
}

impl UpdateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_updating(&self, node_id: &NodeId) -> bool {
        self.updaters.contains_key(node_id)
    }

    pub fn prior_success(&self, node_id: &NodeId) -> bool {
        self.num_successful_updates.get(node_id).copied().unwrap_or(0) > 0
    }

    pub fn has_failed_before(&self, node_id: &NodeId) -> bool {
        self.num_failed_updates.get(node_id).copied().unwrap_or(0) > 0
    }

    /// `can_update(node_id)`: forbids starting a new updater when one
    /// is already live, the launch hash is stale, or a previous update on
    /// this node failed — permanent exclusion for this process's lifetime.
    pub fn can_update(&self, node: &NodeSnapshot, config: &ClusterConfig) -> bool {
        if self.is_updating(&node.id) {
            return false;
        }
        if !launch_config_ok(node, config) {
            return false;
        }
        if self.has_failed_before(&node.id) {
            return false;
        }
        true
    }

    /// Registers a handle synchronously rather than joining updater tasks
    /// at tick end.
    pub fn register(&mut self, handle: UpdaterHandle) {
        self.updaters.insert(handle.node_id.clone(), handle);
    }

    /// Reap step: removes every finished handle, bucketing into
    /// success/failure, and returns enough information for the reconciler
    /// to mark the node active and, on success, persist the hashes this
    /// run was dispatched against.
    pub async fn reap(&mut self) -> Vec<ReapedUpdate> {
        let finished: Vec<NodeId> = self
            .updaters
            .iter()
            .filter(|(_, handle)| !handle.is_alive())
            .map(|(id, _)| id.clone())
            .collect();

        let mut reaped = Vec::with_capacity(finished.len());
        for node_id in finished {
            let Some(handle) = self.updaters.remove(&node_id) else {
                continue;
            };
            let runtime_hash = handle.runtime_hash.clone();
            let file_mounts_contents_hash = handle.file_mounts_contents_hash.clone();
            let exitcode = handle.join().await;
            let success = exitcode == 0;
            if success {
                *self.num_successful_updates.entry(node_id.clone()).or_insert(0) += 1;
            } else {
                *self.num_failed_updates.entry(node_id.clone()).or_insert(0) += 1;
            }
            reaped.push(ReapedUpdate {
                node_id,
                success,
                runtime_hash,
                file_mounts_contents_hash,
            });
        }
        reaped
    }

    pub fn updater_count(&self) -> usize {
        self.updaters.len()
    }

    /// Total failed update runs across all nodes, for status reporting.
    pub fn total_failed_updates(&self) -> usize {
        self.num_failed_updates.values().map(|&count| count as usize).sum()
    }
}

/// One finished updater run, as reported by [`UpdateTracker::reap`].
#[derive(Debug, Clone)]
pub struct ReapedUpdate {
    pub node_id: NodeId,
    pub success: bool,
    pub runtime_hash: String,
    pub file_mounts_contents_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reap_is_empty_when_nothing_dispatched() {
        let mut tracker = UpdateTracker::new();
        let reaped = tracker.reap().await;
        assert!(reaped.is_empty());
    }

    #[tokio::test]
    async fn no_duplicate_updater_for_same_node() {
        let mut tracker = UpdateTracker::new();
        let node_id = NodeId::from("n1");
        let handle = UpdaterHandle::new(node_id.clone(), tokio::spawn(async { 0 }));
        tracker.register(handle);
        assert!(tracker.is_updating(&node_id));
    }
}
