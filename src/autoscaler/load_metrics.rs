//! Load metrics: populated by an external monitor from node heartbeats,
//! read by the reconciler to decide idleness and recovery.

use std::collections::BTreeMap;

use crate::model::ResourceBundle;

#[derive(Debug, Clone, Default)]
pub struct LoadMetrics {
    pub local_ip: Option<String>,
    pub last_used_time_by_ip: BTreeMap<String, i64>,
    pub last_heartbeat_time_by_ip: BTreeMap<String, i64>,

    resource_demand_vector: Vec<ResourceBundle>,
    resource_utilization: BTreeMap<String, ResourceBundle>,
    pending_placement_groups: Vec<ResourceBundle>,
    static_node_resources_by_ip: BTreeMap<String, ResourceBundle>,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prunes `last_used_time_by_ip` and `last_heartbeat_time_by_ip` down to
    /// the union of managed and unmanaged workers' current internal IPs.
    pub fn prune_active_ips(&mut self, active_ips: &[String]) {
        let active: std::collections::BTreeSet<&String> = active_ips.iter().collect();
        self.last_used_time_by_ip.retain(|ip, _| active.contains(ip));
        self.last_heartbeat_time_by_ip.retain(|ip, _| active.contains(ip));
    }

    /// Marks an IP as recently active, so a freshly updated or reaped node
    /// doesn't immediately trip `recover_if_needed`.
    pub fn mark_active(&mut self, ip: &str, now: i64) {
        self.last_used_time_by_ip.insert(ip.to_string(), now);
        self.last_heartbeat_time_by_ip.insert(ip.to_string(), now);
    }

    pub fn mark_heartbeat(&mut self, ip: &str, now: i64) {
        self.last_heartbeat_time_by_ip.insert(ip.to_string(), now);
    }

    pub fn record_usage(&mut self, ip: &str, now: i64) {
        self.last_used_time_by_ip.insert(ip.to_string(), now);
    }

    pub fn get_resource_demand_vector(&self) -> &[ResourceBundle] {
        &self.resource_demand_vector
    }

    pub fn set_resource_demand_vector(&mut self, bundles: Vec<ResourceBundle>) {
        self.resource_demand_vector = bundles;
    }

    pub fn get_resource_utilization(&self) -> &BTreeMap<String, ResourceBundle> {
        &self.resource_utilization
    }

    pub fn get_pending_placement_groups(&self) -> &[ResourceBundle] {
        &self.pending_placement_groups
    }

    pub fn get_static_node_resources_by_ip(&self) -> &BTreeMap<String, ResourceBundle> {
        &self.static_node_resources_by_ip
    }

    pub fn info_string(&self) -> String {
        format!(
            "{} node(s) with recent heartbeats, {} with recorded usage",
            self.last_heartbeat_time_by_ip.len(),
            self.last_used_time_by_ip.len()
        )
    }
}
