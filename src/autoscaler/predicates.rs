//! Node-tag predicates: `launch_config_ok`, `files_up_to_date`,
//! `should_update`'s decision matrix, and the last-used sort / request-
//! resources protection algorithm.

use std::collections::BTreeMap;

use crate::hash;
use crate::model::{tag, ClusterConfig, NodeSnapshot, NodeTypeConfig, ResourceBundle, UpdateInstruction};
use crate::scheduler::bin_pack_residual;

/// True iff the node's `RAY_LAUNCH_CONFIG` tag matches the launch hash
/// computed from the current config for that node's type.
pub fn launch_config_ok(node: &NodeSnapshot, config: &ClusterConfig) -> bool {
    let node_config_override = node
        .node_type()
        .and_then(|t| config.available_node_types.get(t))
        .map(|t| &t.node_config);
    let expected = hash::launch_hash(&config.worker_nodes, node_config_override, &config.auth);
    node.tags.get(tag::LAUNCH_CONFIG).map(String::as_str) == Some(expected.as_str())
}

/// True iff `RAY_RUNTIME_CONFIG` matches `runtime_hash`, and, when
/// continuous sync is enabled, `RAY_FILE_MOUNTS_CONTENTS` matches
/// `file_mounts_contents_hash` too.
pub fn files_up_to_date(
    node: &NodeSnapshot,
    runtime_hash: &str,
    file_mounts_contents_hash: Option<&str>,
) -> bool {
    if node.tags.get(tag::RUNTIME_CONFIG).map(String::as_str) != Some(runtime_hash) {
        return false;
    }
    if let Some(expected) = file_mounts_contents_hash {
        return node.tags.get(tag::FILE_MOUNTS_CONTENTS).map(String::as_str) == Some(expected);
    }
    true
}

/// Sorts node ids by "last used" descending (most-recently-used first).
/// Unknown IPs are treated as older than the oldest known IP so that
/// connected nodes are kept preferentially.
pub fn sort_based_on_last_used<'a>(
    nodes: &'a [NodeSnapshot],
    last_used_time_by_ip: &BTreeMap<String, i64>,
) -> Vec<&'a NodeSnapshot> {
    let oldest_known = last_used_time_by_ip.values().copied().min().unwrap_or(0);
    let unknown_sentinel = oldest_known - 1;

    let mut sorted: Vec<&NodeSnapshot> = nodes.iter().collect();
    sorted.sort_by_key(|node| {
        let last_used = node
            .internal_ip
            .as_ref()
            .and_then(|ip| last_used_time_by_ip.get(ip))
            .copied()
            .unwrap_or(unknown_sentinel);
        std::cmp::Reverse(last_used)
    });
    sorted
}

/// Per-tick per-type counter used to decide `keep_for_min` protection: a
/// node is protected from idle/outdated termination if its position in the
/// (most-recently-used-first) walk is within `min(min_workers, max_workers)`
/// for its type.
#[derive(Debug, Default)]
pub struct MinWorkerCounter {
    counts: BTreeMap<String, usize>,
}

impl MinWorkerCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter for `node_type` and returns whether this
    /// occurrence is still within the type's protected floor.
    pub fn observe_and_is_protected(&mut self, node_type: &str, type_config: &NodeTypeConfig) -> bool {
        let count = self.counts.entry(node_type.to_string()).or_insert(0);
        *count += 1;
        *count <= type_config.min_workers.min(type_config.max_workers)
    }
}

/// Given the sorted (most-recently-used-first) node list and the
/// outstanding resource demand vector, returns, per node (aligned to
/// `sorted_nodes`), whether that node is protected by request-resources
/// binpacking.
pub fn request_resources_protection(
    sorted_nodes: &[&NodeSnapshot],
    node_types: &BTreeMap<String, NodeTypeConfig>,
    resource_demand_vector: &[ResourceBundle],
) -> Vec<bool> {
    if resource_demand_vector.is_empty() {
        return vec![false; sorted_nodes.len()];
    }

    let max_node_resources: Vec<ResourceBundle> = sorted_nodes
        .iter()
        .map(|node| {
            node.node_type()
                .and_then(|t| node_types.get(t))
                .map(|t| t.resources.clone())
                .unwrap_or_default()
        })
        .collect();

    let (unfulfilled, remaining) = bin_pack_residual(&max_node_resources, resource_demand_vector);

    (0..sorted_nodes.len())
        .map(|i| {
            if !unfulfilled.is_empty() {
                return true;
            }
            remaining.get(i) != max_node_resources.get(i)
        })
        .collect()
}

/// `should_update`'s decision matrix. `prior_success` is whether a
/// previous updater run on this node completed with exit code 0.
pub fn should_update(
    node: &NodeSnapshot,
    config: &ClusterConfig,
    runtime_hash: &str,
    file_mounts_contents_hash: Option<&str>,
    prior_success: bool,
    restart_only: bool,
    no_restart: bool,
) -> Option<UpdateInstruction> {
    if node.is_up_to_date_status() && files_up_to_date(node, runtime_hash, file_mounts_contents_hash) {
        return None;
    }

    let type_config = node.node_type().and_then(|t| config.available_node_types.get(t));

    let (init_commands, start_ray_commands) = match (prior_success, restart_only, no_restart) {
        (true, true, _) => (Vec::new(), config.worker_start_ray_commands.clone()),
        (true, _, true) => (
            type_specific_setup_commands(config, type_config),
            Vec::new(),
        ),
        _ => (
            type_specific_setup_commands(config, type_config),
            config.worker_start_ray_commands.clone(),
        ),
    };

    let docker_config = merge_docker_config(&config.docker, type_config.and_then(|t| t.docker.as_ref()));

    Some(UpdateInstruction {
        node_id: node.id.clone(),
        init_commands,
        start_ray_commands,
        docker_config,
    })
}

fn type_specific_setup_commands(config: &ClusterConfig, type_config: Option<&NodeTypeConfig>) -> Vec<String> {
    type_config
        .and_then(|t| t.worker_setup_commands.clone())
        .unwrap_or_else(|| config.worker_setup_commands.clone())
}

fn merge_docker_config(base: &serde_json::Value, override_value: Option<&serde_json::Value>) -> serde_json::Value {
    let Some(override_value) = override_value else {
        return base.clone();
    };
    match (base, override_value) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in override_map {
                merged.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    fn node(id: &str, ip: &str) -> NodeSnapshot {
        NodeSnapshot {
            id: NodeId::from(id),
            tags: Default::default(),
            internal_ip: Some(ip.to_string()),
        }
    }

    #[test]
    fn sorts_most_recently_used_first() {
        let nodes = vec![node("a", "10.0.0.1"), node("b", "10.0.0.2")];
        let mut last_used = BTreeMap::new();
        last_used.insert("10.0.0.1".to_string(), 100);
        last_used.insert("10.0.0.2".to_string(), 200);
        let sorted = sort_based_on_last_used(&nodes, &last_used);
        assert_eq!(sorted[0].id.as_str(), "b");
        assert_eq!(sorted[1].id.as_str(), "a");
    }

    #[test]
    fn unknown_ip_sorts_as_oldest() {
        let nodes = vec![node("known", "10.0.0.1"), node("unknown", "10.0.0.9")];
        let mut last_used = BTreeMap::new();
        last_used.insert("10.0.0.1".to_string(), 100);
        let sorted = sort_based_on_last_used(&nodes, &last_used);
        assert_eq!(sorted[0].id.as_str(), "known");
        assert_eq!(sorted[1].id.as_str(), "unknown");
    }

    #[test]
    fn min_worker_counter_protects_up_to_floor() {
        let mut counter = MinWorkerCounter::new();
        let type_config = NodeTypeConfig {
            resources: Default::default(),
            node_config: serde_json::Value::Null,
            min_workers: 2,
            max_workers: 5,
            worker_setup_commands: None,
            initialization_commands: None,
            docker: None,
        };
        assert!(counter.observe_and_is_protected("A", &type_config));
        assert!(counter.observe_and_is_protected("A", &type_config));
        assert!(!counter.observe_and_is_protected("A", &type_config));
    }

    #[test]
    fn request_resources_protection_empty_vector_protects_nothing() {
        let nodes = vec![node("a", "10.0.0.1")];
        let refs: Vec<&NodeSnapshot> = nodes.iter().collect();
        let protection = request_resources_protection(&refs, &Default::default(), &[]);
        assert_eq!(protection, vec![false]);
    }
}
