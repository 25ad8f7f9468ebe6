//! Deterministic digests over config-derived structures.
//!
//! Inputs are serialized to canonical JSON (stable key order, since the
//! source types use `BTreeMap`/sorted `Vec`s) and hashed with SHA-256,
//! rendered as lowercase hex — the same approach the rest of this codebase
//! uses for artifact checksum verification.

use sha2::{Digest, Sha256};

fn hash_json(value: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(value).expect("serde_json::Value serialization cannot fail");
    let digest = Sha256::digest(&canonical);
    format!("{digest:x}")
}

/// `runtime_hash` = hash of `(file_mounts paths+perms, cluster_synced_files, [setup_commands, start_commands])`.
pub fn runtime_hash(
    file_mounts: &std::collections::BTreeMap<String, String>,
    cluster_synced_files: &[String],
    setup_commands: &[String],
    start_commands: &[String],
) -> String {
    let value = serde_json::json!({
        "file_mounts": file_mounts,
        "cluster_synced_files": cluster_synced_files,
        "commands": [setup_commands, start_commands],
    });
    hash_json(&value)
}

/// `file_mounts_contents_hash` = hash of the mounted files' contents.
/// Only meaningful when `file_mounts_sync_continuously` is set; the caller
/// reads the bytes (out of scope here — the updater subsystem owns file
/// sync) and passes the already-read contents in.
pub fn file_mounts_contents_hash(contents: &std::collections::BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    for (path, bytes) in contents {
        hasher.update(path.as_bytes());
        hasher.update(bytes);
    }
    format!("{:x}", hasher.finalize())
}

/// `launch_hash(node_type)` = hash of `(worker_nodes merged with per-type node_config, auth)`.
pub fn launch_hash(
    worker_nodes: &serde_json::Value,
    node_config_override: Option<&serde_json::Value>,
    auth: &serde_json::Value,
) -> String {
    let merged = merge_json(worker_nodes.clone(), node_config_override);
    let value = serde_json::json!({
        "launch_config": merged,
        "auth": auth,
    });
    hash_json(&value)
}

/// Shallow-merges `override_value` on top of `base` the way the source
/// merges per-node-type `node_config` over the cluster-wide launch template:
/// override keys win, non-overlapping base keys are preserved.
fn merge_json(base: serde_json::Value, override_value: Option<&serde_json::Value>) -> serde_json::Value {
    let Some(override_value) = override_value else {
        return base;
    };
    match (base, override_value) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (k, v) in override_map {
                base_map.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_value) => override_value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn runtime_hash_is_deterministic() {
        let mounts = BTreeMap::from([("~/a".to_string(), "/a".to_string())]);
        let h1 = runtime_hash(&mounts, &[], &["setup".into()], &["start".into()]);
        let h2 = runtime_hash(&mounts, &[], &["setup".into()], &["start".into()]);
        assert_eq!(h1, h2);
    }

    #[test]
    fn runtime_hash_changes_with_commands() {
        let mounts = BTreeMap::new();
        let h1 = runtime_hash(&mounts, &[], &["setup".into()], &["start".into()]);
        let h2 = runtime_hash(&mounts, &[], &["setup-v2".into()], &["start".into()]);
        assert_ne!(h1, h2);
    }

    #[test]
    fn launch_hash_picks_up_node_type_override() {
        let base = serde_json::json!({"image_id": "ami-1"});
        let auth = serde_json::json!({});
        let h1 = launch_hash(&base, None, &auth);
        let override_value = serde_json::json!({"image_id": "ami-2"});
        let h2 = launch_hash(&base, Some(&override_value), &auth);
        assert_ne!(h1, h2);
    }
}
