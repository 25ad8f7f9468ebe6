//! Core data model: node identity, tags, node types, and the cluster
//! configuration they are derived from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque provider-assigned node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        NodeId(value)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId(value.to_string())
    }
}

/// A node's role in the fleet, carried in the `RAY_NODE_KIND` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Head,
    Worker,
    Unmanaged,
}

impl NodeKind {
    pub fn as_tag_value(self) -> &'static str {
        match self {
            NodeKind::Head => "head",
            NodeKind::Worker => "worker",
            NodeKind::Unmanaged => "unmanaged",
        }
    }
}

/// Well-known keys the reconciler reads from / writes to a node's tag set.
/// Kept as the literal names the rest of the data model is specified against.
pub mod tag {
    pub const NODE_KIND: &str = "RAY_NODE_KIND";
    pub const NODE_STATUS: &str = "RAY_NODE_STATUS";
    pub const USER_NODE_TYPE: &str = "RAY_USER_NODE_TYPE";
    pub const LAUNCH_CONFIG: &str = "RAY_LAUNCH_CONFIG";
    pub const RUNTIME_CONFIG: &str = "RAY_RUNTIME_CONFIG";
    pub const FILE_MOUNTS_CONTENTS: &str = "RAY_FILE_MOUNTS_CONTENTS";

    pub const STATUS_UP_TO_DATE: &str = "up_to_date";
}

/// A node's tag set. `BTreeMap` (not `HashMap`) so iteration order is
/// deterministic — load-bearing for hash reproducibility (see `hash.rs`).
pub type NodeTags = BTreeMap<String, String>;

/// A bundle of named resource quantities, e.g. `{"CPU": 4.0, "GPU": 1.0}`.
/// `BTreeMap` for the same determinism reason as `NodeTags`.
pub type ResourceBundle = BTreeMap<String, f64>;

/// Declarative per-node-type launch template and capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTypeConfig {
    #[serde(default)]
    pub resources: ResourceBundle,
    /// Opaque provider launch parameters, merged over the cluster-wide
    /// `worker_nodes` template when computing `launch_hash`.
    #[serde(default)]
    pub node_config: serde_json::Value,
    #[serde(default)]
    pub min_workers: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub worker_setup_commands: Option<Vec<String>>,
    #[serde(default)]
    pub initialization_commands: Option<Vec<String>>,
    #[serde(default)]
    pub docker: Option<serde_json::Value>,
}

fn default_max_workers() -> usize {
    usize::MAX
}

/// Declarative in-memory representation of the YAML cluster config. See
/// `config::refresher` for how this is loaded, revalidated, and hashed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub max_workers: usize,
    pub idle_timeout_minutes: u64,

    #[serde(default)]
    pub upscaling_speed: Option<f64>,
    #[serde(default)]
    pub autoscaling_mode: Option<String>,
    #[serde(default)]
    pub target_utilization_fraction: Option<f64>,

    /// remote path -> local path. Local paths are `~`-expanded once, at
    /// first construction.
    #[serde(default)]
    pub file_mounts: BTreeMap<String, String>,
    #[serde(default)]
    pub cluster_synced_files: Vec<String>,
    #[serde(default)]
    pub worker_setup_commands: Vec<String>,
    #[serde(default)]
    pub worker_start_ray_commands: Vec<String>,

    /// Skip setup commands and only restart ray on nodes whose prior update
    /// succeeded; mutually exclusive with `no_restart` (`restart_only` wins
    /// if both are set).
    #[serde(default)]
    pub restart_only: bool,
    /// Run setup commands but never restart ray on nodes whose prior update
    /// succeeded.
    #[serde(default)]
    pub no_restart: bool,

    #[serde(default)]
    pub auth: serde_json::Value,
    #[serde(default)]
    pub provider: serde_json::Value,
    /// Cluster-wide default launch template, merged with per-type
    /// `node_config` overrides when computing `launch_hash`.
    #[serde(default)]
    pub worker_nodes: serde_json::Value,
    #[serde(default)]
    pub docker: serde_json::Value,

    #[serde(default)]
    pub file_mounts_sync_continuously: bool,

    pub available_node_types: BTreeMap<String, NodeTypeConfig>,
}

impl ClusterConfig {
    /// Effective `upscaling_speed`, resolved by precedence:
    /// explicit field > legacy `aggressive` mode > `target_utilization_fraction` > default.
    pub fn effective_upscaling_speed(&self) -> f64 {
        if let Some(speed) = self.upscaling_speed {
            return speed;
        }
        if self.autoscaling_mode.as_deref() == Some("aggressive") {
            return 99_999.0;
        }
        if let Some(fraction) = self.target_utilization_fraction {
            return 1.0 / fraction.max(1e-3) - 1.0;
        }
        1.0
    }
}

/// A live node snapshot the reconciler assembles each tick from provider
/// calls plus the node's tags.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub tags: NodeTags,
    pub internal_ip: Option<String>,
}

impl NodeSnapshot {
    pub fn node_type(&self) -> Option<&str> {
        self.tags.get(tag::USER_NODE_TYPE).map(String::as_str)
    }

    pub fn kind(&self) -> Option<&str> {
        self.tags.get(tag::NODE_KIND).map(String::as_str)
    }

    pub fn is_up_to_date_status(&self) -> bool {
        self.tags.get(tag::NODE_STATUS).map(String::as_str) == Some(tag::STATUS_UP_TO_DATE)
    }
}

/// One instruction the resource-demand scheduler produced: launch `count`
/// nodes of `node_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub node_type: String,
    pub count: usize,
}

/// What `should_update` decided a node needs run against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInstruction {
    pub node_id: NodeId,
    pub init_commands: Vec<String>,
    pub start_ray_commands: Vec<String>,
    pub docker_config: serde_json::Value,
}
