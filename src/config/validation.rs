//! Config validation. A forgiving reference implementation doing the
//! structural checks the data model itself requires. A real deployment
//! can swap in a JSON-Schema-backed validator without touching the
//! refresher.

use crate::error::ConfigError;
use crate::model::ClusterConfig;

/// Structural validation. Failures here are logged and otherwise ignored by
/// the refresher so older cluster configs keep running — this function
/// only decides *what* the message says.
pub fn validate_config(config: &ClusterConfig) -> Result<(), ConfigError> {
    if config.available_node_types.is_empty() {
        return Err(ConfigError::Validation(
            "available_node_types must not be empty".to_string(),
        ));
    }

    for (name, node_type) in &config.available_node_types {
        if node_type.min_workers > node_type.max_workers {
            return Err(ConfigError::Validation(format!(
                "node type {name}: min_workers ({}) exceeds max_workers ({})",
                node_type.min_workers, node_type.max_workers
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeTypeConfig;
    use std::collections::BTreeMap;

    fn base_config() -> ClusterConfig {
        ClusterConfig {
            max_workers: 10,
            idle_timeout_minutes: 5,
            upscaling_speed: None,
            autoscaling_mode: None,
            target_utilization_fraction: None,
            file_mounts: BTreeMap::new(),
            cluster_synced_files: vec![],
            worker_setup_commands: vec![],
            worker_start_ray_commands: vec![],
            restart_only: false,
            no_restart: false,
            auth: serde_json::Value::Null,
            provider: serde_json::Value::Null,
            worker_nodes: serde_json::Value::Null,
            docker: serde_json::Value::Null,
            file_mounts_sync_continuously: false,
            available_node_types: BTreeMap::new(),
        }
    }

    #[test]
    fn rejects_empty_node_types() {
        let config = base_config();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let mut config = base_config();
        config.available_node_types.insert(
            "A".to_string(),
            NodeTypeConfig {
                resources: BTreeMap::new(),
                node_config: serde_json::Value::Null,
                min_workers: 5,
                max_workers: 2,
                worker_setup_commands: None,
                initialization_commands: None,
                docker: None,
            },
        );
        assert!(validate_config(&config).is_err());
    }
}
