//! # Node Provider Trait
//!
//! Abstract interface for cloud node providers.
//!
//! This trait lets the reconciler create, list, tag, and destroy nodes
//! through a unified interface regardless of which cloud backend is behind
//! it.

pub mod kubernetes;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::{NodeId, NodeTags};

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Provider trait for cloud node backends.
#[async_trait]
pub trait NodeProvider: Send + Sync {
    /// List non-terminated nodes matching the given tag filters.
    async fn non_terminated_nodes(&self, tag_filters: &BTreeMap<String, String>) -> Result<Vec<NodeId>>;

    /// Read a node's current tag set.
    async fn node_tags(&self, id: &NodeId) -> Result<NodeTags>;

    /// Read a node's internal IP, if the node has one yet.
    async fn internal_ip(&self, id: &NodeId) -> Result<Option<String>>;

    /// Terminate a batch of nodes. Idempotent: terminating an already-gone
    /// node is tolerated.
    async fn terminate_nodes(&self, ids: &[NodeId]) -> Result<()>;

    /// Request `count` new nodes of `node_type` using `node_config` as the
    /// opaque launch parameters. Returns the newly created node ids, when
    /// known synchronously (some providers only learn ids on a later list
    /// call, in which case an empty vec is acceptable).
    async fn create_node(
        &self,
        node_type: &str,
        node_config: &serde_json::Value,
        count: usize,
    ) -> Result<Vec<NodeId>>;

    /// Overwrite (merge) tags on a node. Used by updaters to record
    /// `RAY_RUNTIME_CONFIG` / `RAY_NODE_STATUS` after a successful run.
    async fn set_node_tags(&self, id: &NodeId, tags: &NodeTags) -> Result<()>;
}
