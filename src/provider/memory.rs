//! In-process reference [`NodeProvider`] implementation.
//!
//! Used by the integration test suite and by `fleetctl`'s local dry-run mode.
//! Backed by a plain `tokio::sync::Mutex`-guarded map rather than a real
//! cloud backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::model::{NodeId, NodeTags};
use crate::provider::{NodeProvider, Result};

#[derive(Debug, Clone)]
struct MemoryNode {
    tags: NodeTags,
    internal_ip: Option<String>,
    terminated: bool,
}

/// Thread-safe in-memory fleet. Node ids are assigned sequentially
/// (`node-<n>`) so test scenarios can assert on them deterministically.
#[derive(Debug, Clone)]
pub struct MemoryNodeProvider {
    nodes: Arc<Mutex<BTreeMap<NodeId, MemoryNode>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for MemoryNodeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNodeProvider {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Seed a node directly, bypassing `create_node` — used by tests to set
    /// up a fleet in a specific starting state.
    pub async fn seed_node(&self, id: NodeId, tags: NodeTags, internal_ip: Option<String>) {
        let mut nodes = self.nodes.lock().await;
        nodes.insert(
            id,
            MemoryNode {
                tags,
                internal_ip,
                terminated: false,
            },
        );
    }

    pub async fn node_count(&self) -> usize {
        let nodes = self.nodes.lock().await;
        nodes.values().filter(|n| !n.terminated).count()
    }

    pub async fn tags_of(&self, id: &NodeId) -> Option<NodeTags> {
        let nodes = self.nodes.lock().await;
        nodes.get(id).map(|n| n.tags.clone())
    }
}

#[async_trait]
impl NodeProvider for MemoryNodeProvider {
    async fn non_terminated_nodes(&self, tag_filters: &BTreeMap<String, String>) -> Result<Vec<NodeId>> {
        let nodes = self.nodes.lock().await;
        Ok(nodes
            .iter()
            .filter(|(_, node)| !node.terminated)
            .filter(|(_, node)| {
                tag_filters
                    .iter()
                    .all(|(key, value)| node.tags.get(key) == Some(value))
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn node_tags(&self, id: &NodeId) -> Result<NodeTags> {
        let nodes = self.nodes.lock().await;
        Ok(nodes.get(id).map(|n| n.tags.clone()).unwrap_or_default())
    }

    async fn internal_ip(&self, id: &NodeId) -> Result<Option<String>> {
        let nodes = self.nodes.lock().await;
        Ok(nodes.get(id).and_then(|n| n.internal_ip.clone()))
    }

    async fn terminate_nodes(&self, ids: &[NodeId]) -> Result<()> {
        let mut nodes = self.nodes.lock().await;
        for id in ids {
            if let Some(node) = nodes.get_mut(id) {
                node.terminated = true;
            }
        }
        Ok(())
    }

    async fn create_node(
        &self,
        node_type: &str,
        _node_config: &serde_json::Value,
        count: usize,
    ) -> Result<Vec<NodeId>> {
        let mut nodes = self.nodes.lock().await;
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let id = NodeId(format!("node-{n}"));
            let mut tags = NodeTags::new();
            tags.insert(crate::model::tag::NODE_KIND.to_string(), "worker".to_string());
            tags.insert(
                crate::model::tag::USER_NODE_TYPE.to_string(),
                node_type.to_string(),
            );
            nodes.insert(
                id.clone(),
                MemoryNode {
                    tags,
                    internal_ip: Some(format!("10.0.0.{n}")),
                    terminated: false,
                },
            );
            created.push(id);
        }
        Ok(created)
    }

    async fn set_node_tags(&self, id: &NodeId, tags: &NodeTags) -> Result<()> {
        let mut nodes = self.nodes.lock().await;
        if let Some(node) = nodes.get_mut(id) {
            for (key, value) in tags {
                node.tags.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }
}
