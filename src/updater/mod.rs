//! Per-node updater: constructed with the command lists `should_update`
//! decided on, run asynchronously, and tracked by the reconciler's
//! `updaters` map.

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::model::NodeId;

/// Inputs an updater is constructed with. Provider/auth/cluster-name
/// plumbing is threaded through the concrete `Updater` impl's constructor
/// instead of this per-dispatch struct, since those are constant for the
/// process lifetime.
#[derive(Debug, Clone)]
pub struct UpdateSpec {
    pub node_id: NodeId,
    pub internal_ip: Option<String>,
    pub file_mounts: std::collections::BTreeMap<String, String>,
    pub initialization_commands: Vec<String>,
    pub setup_commands: Vec<String>,
    pub ray_start_commands: Vec<String>,
    pub runtime_hash: String,
    pub file_mounts_contents_hash: Option<String>,
    pub docker_config: serde_json::Value,
    pub use_internal_ip: bool,
}

/// Runs file sync and remote command execution for one node, then reports
/// success/failure.
#[async_trait]
pub trait Updater: Send + Sync {
    /// Starts the update and returns a handle. The reconciler registers the
    /// handle into `updaters` synchronously and does not await it within the
    /// tick.
    fn start(&self, spec: UpdateSpec) -> UpdaterHandle;
}

/// A live or completed updater run. `exitcode` follows the source's
/// convention: `0` is success, anything else is failure.
#[derive(Debug)]
pub struct UpdaterHandle {
    pub node_id: NodeId,
    /// The hashes this run was dispatched against, carried along so the
    /// reap step can tag the node with the values that were actually
    /// applied rather than whatever the config refresher holds by the time
    /// the run finishes.
    pub runtime_hash: String,
    pub file_mounts_contents_hash: Option<String>,
    join: JoinHandle<i32>,
}

impl UpdaterHandle {
    pub fn new(node_id: NodeId, join: JoinHandle<i32>) -> Self {
        Self {
            node_id,
            runtime_hash: String::new(),
            file_mounts_contents_hash: None,
            join,
        }
    }

    pub fn with_hashes(mut self, runtime_hash: String, file_mounts_contents_hash: Option<String>) -> Self {
        self.runtime_hash = runtime_hash;
        self.file_mounts_contents_hash = file_mounts_contents_hash;
        self
    }

    pub fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }

    /// Consumes the handle, awaiting completion. Used by the reap step once
    /// `is_alive()` is false so the actual exit code is recovered.
    pub async fn join(self) -> i32 {
        self.join.await.unwrap_or(1)
    }
}

/// Reference [`Updater`]: reports immediate success without touching the
/// network or filesystem. Used in tests and as the default for dry-run mode.
#[derive(Debug, Default)]
pub struct NoopUpdater;

#[async_trait]
impl Updater for NoopUpdater {
    fn start(&self, spec: UpdateSpec) -> UpdaterHandle {
        let node_id = spec.node_id.clone();
        let runtime_hash = spec.runtime_hash.clone();
        let file_mounts_contents_hash = spec.file_mounts_contents_hash.clone();
        let join = tokio::spawn(async move { 0 });
        UpdaterHandle::new(node_id, join).with_hashes(runtime_hash, file_mounts_contents_hash)
    }
}

/// Deployable default [`Updater`]: runs each command list through
/// `tokio::process::Command`, substituting the head node IP placeholder
/// first.
#[derive(Debug, Clone)]
pub struct ShellCommandUpdater {
    pub head_node_ip: Option<String>,
}

const HEAD_IP_PLACEHOLDER: &str = "$RAY_HEAD_IP";

/// `with_head_node_ip(cmds, head_ip)`: substitutes the placeholder with the
/// head node's IP in every command string.
pub fn with_head_node_ip(commands: &[String], head_ip: Option<&str>) -> Vec<String> {
    let Some(head_ip) = head_ip else {
        return commands.to_vec();
    };
    commands
        .iter()
        .map(|cmd| cmd.replace(HEAD_IP_PLACEHOLDER, head_ip))
        .collect()
}

#[async_trait]
impl Updater for ShellCommandUpdater {
    fn start(&self, spec: UpdateSpec) -> UpdaterHandle {
        let node_id = spec.node_id.clone();
        let runtime_hash = spec.runtime_hash.clone();
        let file_mounts_contents_hash = spec.file_mounts_contents_hash.clone();
        let head_ip = self.head_node_ip.clone();
        let join = tokio::spawn(async move {
            let init = with_head_node_ip(&spec.initialization_commands, head_ip.as_deref());
            let setup = with_head_node_ip(&spec.setup_commands, head_ip.as_deref());
            let ray = with_head_node_ip(&spec.ray_start_commands, head_ip.as_deref());
            for command in init.iter().chain(setup.iter()).chain(ray.iter()) {
                let status = tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .status()
                    .await;
                match status {
                    Ok(status) if status.success() => continue,
                    Ok(status) => {
                        tracing::warn!(node_id = %spec.node_id, command, code = status.code(), "updater command failed");
                        return status.code().unwrap_or(1);
                    }
                    Err(error) => {
                        tracing::warn!(node_id = %spec.node_id, command, %error, "updater command errored");
                        return 1;
                    }
                }
            }
            0
        });
        UpdaterHandle::new(node_id, join).with_hashes(runtime_hash, file_mounts_contents_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_head_ip_placeholder() {
        let commands = vec!["connect $RAY_HEAD_IP:6379".to_string()];
        let out = with_head_node_ip(&commands, Some("10.0.0.5"));
        assert_eq!(out[0], "connect 10.0.0.5:6379");
    }

    #[test]
    fn leaves_commands_untouched_without_head_ip() {
        let commands = vec!["connect $RAY_HEAD_IP:6379".to_string()];
        let out = with_head_node_ip(&commands, None);
        assert_eq!(out, commands);
    }

    #[tokio::test]
    async fn noop_updater_reports_success() {
        let updater = NoopUpdater;
        let handle = updater.start(UpdateSpec {
            node_id: NodeId::from("n1"),
            internal_ip: None,
            file_mounts: Default::default(),
            initialization_commands: vec![],
            setup_commands: vec![],
            ray_start_commands: vec![],
            runtime_hash: "h".into(),
            file_mounts_contents_hash: None,
            docker_config: serde_json::Value::Null,
            use_internal_ip: true,
        });
        assert_eq!(handle.join().await, 0);
    }
}
