//! Resource-demand scheduling: the `bin_pack_residual` primitive the
//! reconciler uses to protect nodes satisfying requested resources, and the
//! `ResourceDemandScheduler` collaborator interface plus a reference
//! implementation.

use std::collections::BTreeMap;

use crate::model::{NodeTypeConfig, ResourceBundle};

/// Greedy first-fit bin packing of `demand` bundles into `node_capacities`,
/// in the order given by the caller (the reconciler passes nodes ordered
/// most-recently-used first so that packing prefers those nodes).
///
/// Returns `(unfulfilled, remaining_per_node)`: `unfulfilled` is the demand
/// bundles (or partial remainders of them) that fit nowhere;
/// `remaining_per_node[i]` is what is left of `node_capacities[i]` after
/// packing, aligned index-for-index with the input.
pub fn bin_pack_residual(
    node_capacities: &[ResourceBundle],
    demand: &[ResourceBundle],
) -> (Vec<ResourceBundle>, Vec<ResourceBundle>) {
    let mut remaining: Vec<ResourceBundle> = node_capacities.to_vec();
    let mut unfulfilled = Vec::new();

    for bundle in demand {
        let mut residual = bundle.clone();
        for node in remaining.iter_mut() {
            if residual.is_empty() {
                break;
            }
            subtract_what_fits(node, &mut residual);
        }
        if !residual.is_empty() {
            unfulfilled.push(residual);
        }
    }

    (unfulfilled, remaining)
}

/// Subtracts as much of `residual` as `node` has capacity for, in place,
/// removing satisfied resource keys from `residual`.
fn subtract_what_fits(node: &mut ResourceBundle, residual: &mut ResourceBundle) {
    let mut satisfied_keys = Vec::new();
    for (resource, needed) in residual.iter_mut() {
        let available = node.entry(resource.clone()).or_insert(0.0);
        if *available <= 0.0 || *needed <= 0.0 {
            continue;
        }
        let taken = needed.min(*available);
        *available -= taken;
        *needed -= taken;
        if *needed <= f64::EPSILON {
            satisfied_keys.push(resource.clone());
        }
    }
    for key in satisfied_keys {
        residual.remove(&key);
    }
}

/// Aggregate fleet state the scheduler needs to decide what to launch.
#[derive(Debug, Clone, Default)]
pub struct SchedulerInput<'a> {
    pub node_types: &'a BTreeMap<String, NodeTypeConfig>,
    /// Count of non-terminated nodes, by type, currently in the fleet.
    pub current_counts: BTreeMap<String, usize>,
    /// Count of launches already enqueued but not yet visible, by type.
    pub pending_counts: BTreeMap<String, usize>,
    pub resource_demand: Vec<ResourceBundle>,
    pub ensure_min_cluster_size: Vec<ResourceBundle>,
    pub upscaling_speed: f64,
    pub cluster_max_workers: usize,
}

/// Decides how many nodes of each type to launch. `bin_pack_residual` above
/// is reconciler-owned and fully specified; everything else about the
/// scheduler's internal heuristics is a pluggable implementation detail.
pub trait ResourceDemandScheduler: Send + Sync {
    fn get_nodes_to_launch(&self, input: &SchedulerInput<'_>) -> BTreeMap<String, usize>;
}

/// Reference implementation: top up under-`min_workers` types first, then
/// greedily cover any unfulfilled `ensure_min_cluster_size` demand with the
/// cheapest-fitting type that still has headroom, scaled by `upscaling_speed`.
#[derive(Debug, Default)]
pub struct SimpleResourceDemandScheduler;

impl ResourceDemandScheduler for SimpleResourceDemandScheduler {
    fn get_nodes_to_launch(&self, input: &SchedulerInput<'_>) -> BTreeMap<String, usize> {
        let mut to_launch: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_existing: usize = input.current_counts.values().sum::<usize>()
            + input.pending_counts.values().sum::<usize>();

        for (type_name, type_config) in input.node_types {
            let have = input.current_counts.get(type_name).copied().unwrap_or(0)
                + input.pending_counts.get(type_name).copied().unwrap_or(0);
            if have < type_config.min_workers {
                let room_in_cluster = input.cluster_max_workers.saturating_sub(total_existing);
                let deficit = (type_config.min_workers - have).min(room_in_cluster);
                if deficit > 0 {
                    *to_launch.entry(type_name.clone()).or_insert(0) += deficit;
                    total_existing += deficit;
                }
            }
        }

        let node_capacities: Vec<ResourceBundle> = input
            .node_types
            .iter()
            .flat_map(|(type_name, type_config)| {
                let count = input.current_counts.get(type_name).copied().unwrap_or(0);
                std::iter::repeat(type_config.resources.clone()).take(count)
            })
            .collect();
        let (unfulfilled, _) = bin_pack_residual(&node_capacities, &input.ensure_min_cluster_size);

        for bundle in &unfulfilled {
            let Some((type_name, type_config)) = cheapest_fit(input.node_types, bundle) else {
                continue;
            };
            let have = input.current_counts.get(type_name).copied().unwrap_or(0)
                + to_launch.get(type_name).copied().unwrap_or(0)
                + input.pending_counts.get(type_name).copied().unwrap_or(0);
            let room_in_cluster = input.cluster_max_workers.saturating_sub(total_existing);
            if have >= type_config.max_workers || room_in_cluster == 0 {
                continue;
            }
            let scaled = ((input.upscaling_speed.max(1.0)) as usize).max(1).min(room_in_cluster);
            *to_launch.entry(type_name.clone()).or_insert(0) += scaled;
            total_existing += scaled;
        }

        to_launch.retain(|_, count| *count > 0);
        to_launch
    }
}

/// Smallest node type (by summed declared resource capacity) whose
/// resources can fully satisfy `bundle`.
fn cheapest_fit<'a>(
    node_types: &'a BTreeMap<String, NodeTypeConfig>,
    bundle: &ResourceBundle,
) -> Option<(&'a String, &'a NodeTypeConfig)> {
    node_types
        .iter()
        .filter(|(_, config)| {
            bundle
                .iter()
                .all(|(resource, amount)| config.resources.get(resource).copied().unwrap_or(0.0) >= *amount)
        })
        .min_by(|(_, a), (_, b)| {
            let sum_a: f64 = a.resources.values().sum();
            let sum_b: f64 = b.resources.values().sum();
            sum_a.partial_cmp(&sum_b).unwrap_or(std::cmp::Ordering::Equal)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(pairs: &[(&str, f64)]) -> ResourceBundle {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn empty_demand_leaves_nothing_unfulfilled() {
        let nodes = vec![bundle(&[("CPU", 4.0)])];
        let (unfulfilled, remaining) = bin_pack_residual(&nodes, &[]);
        assert!(unfulfilled.is_empty());
        assert_eq!(remaining, nodes);
    }

    #[test]
    fn exact_fit_consumes_capacity_fully() {
        let nodes = vec![bundle(&[("CPU", 4.0)])];
        let demand = vec![bundle(&[("CPU", 4.0)])];
        let (unfulfilled, remaining) = bin_pack_residual(&nodes, &demand);
        assert!(unfulfilled.is_empty());
        assert_eq!(remaining[0].get("CPU").copied().unwrap_or(0.0), 0.0);
    }

    #[test]
    fn partial_fit_spills_across_nodes() {
        let nodes = vec![bundle(&[("CPU", 2.0)]), bundle(&[("CPU", 4.0)])];
        let demand = vec![bundle(&[("CPU", 5.0)])];
        let (unfulfilled, remaining) = bin_pack_residual(&nodes, &demand);
        assert!(unfulfilled.is_empty());
        assert_eq!(remaining[0].get("CPU").copied().unwrap_or(0.0), 0.0);
        assert_eq!(remaining[1].get("CPU").copied().unwrap_or(0.0), 1.0);
    }

    #[test]
    fn over_demand_is_reported_unfulfilled() {
        let nodes = vec![bundle(&[("CPU", 2.0)])];
        let demand = vec![bundle(&[("CPU", 5.0)])];
        let (unfulfilled, _remaining) = bin_pack_residual(&nodes, &demand);
        assert_eq!(unfulfilled.len(), 1);
        assert_eq!(unfulfilled[0].get("CPU").copied().unwrap_or(0.0), 3.0);
    }
}
