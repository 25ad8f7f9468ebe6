//! The reconciler: single-tick orchestration of terminate, launch,
//! update, and recovery. This is the core of the control loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::autoscaler::launch_pool::LaunchPool;
use crate::autoscaler::load_metrics::LoadMetrics;
use crate::autoscaler::predicates::{
    launch_config_ok, request_resources_protection, should_update, sort_based_on_last_used, MinWorkerCounter,
};
use crate::autoscaler::status::{build_status_string, DebugSink, KEY_AUTOSCALING_ERROR, KEY_AUTOSCALING_STATUS};
use crate::autoscaler::update_tracker::UpdateTracker;
use crate::config::ConfigRefresher;
use crate::error::{AutoscalerError, Result};
use crate::model::{tag, NodeId, NodeSnapshot, ResourceBundle};
use crate::observability::metrics;
use crate::scheduler::SchedulerInput;
use crate::updater::{UpdateSpec, Updater};

/// Construction-time tunables that are process config rather than cluster
/// config: these come from environment/CLI, not the YAML cluster config
/// file.
#[derive(Debug, Clone)]
pub struct AutoscalerOptions {
    pub update_interval: std::time::Duration,
    pub max_failures: u32,
    pub max_launch_batch: usize,
    pub max_concurrent_launches: usize,
    pub heartbeat_timeout: std::time::Duration,
    pub head_node_ip: Option<String>,
}

impl Default for AutoscalerOptions {
    fn default() -> Self {
        Self {
            update_interval: crate::constants::update_interval(),
            max_failures: crate::constants::DEFAULT_MAX_FAILURES,
            max_launch_batch: crate::constants::DEFAULT_MAX_LAUNCH_BATCH,
            max_concurrent_launches: crate::constants::DEFAULT_MAX_CONCURRENT_LAUNCHES,
            heartbeat_timeout: crate::constants::heartbeat_timeout(),
            head_node_ip: None,
        }
    }
}

pub struct Autoscaler {
    config_refresher: ConfigRefresher,
    load_metrics: LoadMetrics,
    launch_pool: LaunchPool,
    update_tracker: UpdateTracker,
    updater: Arc<dyn Updater>,
    debug_sink: Arc<dyn DebugSink>,
    options: AutoscalerOptions,

    // Per-reconciler mutable state, confined to this struct's owner.
    resource_demand_vector: Vec<ResourceBundle>,
    num_failures: u32,
    last_update_time: Option<Instant>,
}

impl std::fmt::Debug for Autoscaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autoscaler")
            .field("num_failures", &self.num_failures)
            .field("updater_count", &self.update_tracker.updater_count())
            .finish()
    }
}

impl Autoscaler {
    pub fn new(
        config_refresher: ConfigRefresher,
        updater: Arc<dyn Updater>,
        debug_sink: Arc<dyn DebugSink>,
        options: AutoscalerOptions,
    ) -> Self {
        let provider = config_refresher.provider();
        let launch_pool = LaunchPool::spawn(provider, options.max_concurrent_launches, options.max_launch_batch);
        Self {
            config_refresher,
            load_metrics: LoadMetrics::new(),
            launch_pool,
            update_tracker: UpdateTracker::new(),
            updater,
            debug_sink,
            options,
            resource_demand_vector: Vec::new(),
            num_failures: 0,
            last_update_time: None,
        }
    }

    pub fn load_metrics_mut(&mut self) -> &mut LoadMetrics {
        &mut self.load_metrics
    }

    /// `request_resources(bundles)`: replaces `resource_demand_vector`
    /// wholesale.
    pub fn request_resources(&mut self, bundles: Vec<ResourceBundle>) {
        self.resource_demand_vector = bundles;
    }

    /// `kill_workers()`: terminates every managed worker. Logs but
    /// does not abort on provider failure.
    pub async fn kill_workers(&self) {
        let provider = self.config_refresher.provider();
        let mut filters = BTreeMap::new();
        filters.insert(tag::NODE_KIND.to_string(), "worker".to_string());
        match provider.non_terminated_nodes(&filters).await {
            Ok(ids) => {
                tracing::info!(count = ids.len(), "kill_workers: terminating all managed workers");
                if let Err(error) = provider.terminate_nodes(&ids).await {
                    tracing::warn!(%error, "kill_workers: terminate_nodes failed");
                }
            }
            Err(error) => tracing::warn!(%error, "kill_workers: failed to list workers"),
        }
    }

    /// Public entry point. Invoked periodically by an external monitor loop.
    pub async fn update(&mut self) -> Result<()> {
        // Step: config refresh, errors_fatal=false on every tick after construction.
        if let Err(error) = self.config_refresher.reset(false) {
            tracing::warn!(%error, "config refresh reported an error; continuing with held config");
        }

        if let Some(last) = self.last_update_time {
            if last.elapsed() < self.options.update_interval {
                return Ok(());
            }
        }

        match self.run_tick().await {
            Ok(()) => {
                self.last_update_time = Some(Instant::now());
                self.num_failures = 0;
                Ok(())
            }
            Err(error) => {
                let is_k8s_transient = error.is_k8s_transient();
                self.debug_sink.put(KEY_AUTOSCALING_ERROR, error.to_string()).await;
                if !is_k8s_transient {
                    self.num_failures += 1;
                    metrics::TICK_FAILURES.inc();
                }
                if self.num_failures > self.options.max_failures {
                    return Err(error);
                }
                tracing::warn!(%error, failures = self.num_failures, "tick failed, will retry next interval");
                Ok(())
            }
        }
    }

    /// The 7-step tick body.
    async fn run_tick(&mut self) -> Result<()> {
        let _span = tracing::info_span!("autoscaler.tick").entered();
        metrics::TICKS.inc();
        let now = now_unix();

        let provider = self.config_refresher.provider();
        let config = self.config_refresher.config().clone();
        let runtime_hash = self.config_refresher.runtime_hash().to_string();
        let file_mounts_contents_hash = self.config_refresher.file_mounts_contents_hash().map(str::to_string);

        // Step 1 — snapshot.
        let nodes = self.snapshot_workers(&provider).await?;
        let active_ips: Vec<String> = nodes.iter().filter_map(|n| n.internal_ip.clone()).collect();
        self.load_metrics.prune_active_ips(&active_ips);
        self.load_metrics.set_resource_demand_vector(self.resource_demand_vector.clone());

        // Step 2 — terminate idle/outdated.
        let horizon = now - 60 * config.idle_timeout_minutes as i64;
        let sorted = sort_based_on_last_used(&nodes, &self.load_metrics.last_used_time_by_ip);
        let request_protection =
            request_resources_protection(&sorted, &config.available_node_types, &self.resource_demand_vector);

        let mut min_worker_counter = MinWorkerCounter::new();
        let mut terminate_ids: Vec<NodeId> = Vec::new();
        for (i, node) in sorted.iter().enumerate() {
            let hash_ok = launch_config_ok(node, &config);

            let keep_for_min = match node.node_type() {
                Some(node_type) => match config.available_node_types.get(node_type) {
                    Some(type_config) => min_worker_counter.observe_and_is_protected(node_type, type_config),
                    None => false,
                },
                None => false,
            };
            let keep_for_request = request_protection.get(i).copied().unwrap_or(false);

            if (keep_for_min || keep_for_request) && hash_ok {
                continue;
            }

            let idle = node
                .internal_ip
                .as_ref()
                .and_then(|ip| self.load_metrics.last_used_time_by_ip.get(ip))
                .map(|&last_used| last_used < horizon)
                .unwrap_or(false);

            if idle || !hash_ok {
                terminate_ids.push(node.id.clone());
            }
        }

        let mut remaining_nodes: Vec<NodeSnapshot> = nodes
            .iter()
            .filter(|n| !terminate_ids.contains(&n.id))
            .cloned()
            .collect();

        if !terminate_ids.is_empty() {
            provider
                .terminate_nodes(&terminate_ids)
                .await
                .map_err(AutoscalerError::from)?;
            metrics::NODES_TERMINATED.inc_by(terminate_ids.len() as u64);
        }

        // Step 3 — terminate excess (pop least-recently-used until under max_workers).
        let sorted_remaining = sort_based_on_last_used(&remaining_nodes, &self.load_metrics.last_used_time_by_ip);
        let mut excess_ids: Vec<NodeId> = Vec::new();
        if sorted_remaining.len() > config.max_workers {
            let excess_count = sorted_remaining.len() - config.max_workers;
            excess_ids = sorted_remaining
                .iter()
                .rev()
                .take(excess_count)
                .map(|n| n.id.clone())
                .collect();
        }
        if !excess_ids.is_empty() {
            provider.terminate_nodes(&excess_ids).await.map_err(AutoscalerError::from)?;
            metrics::NODES_TERMINATED.inc_by(excess_ids.len() as u64);
            remaining_nodes.retain(|n| !excess_ids.contains(&n.id));
        }

        // Step 4 — launch.
        let current_counts = count_by_type(&remaining_nodes);
        let pending_counts = self.launch_pool.pending_launches().breakdown().await;
        let scheduler = self.config_refresher.scheduler();
        let scheduler_input = SchedulerInput {
            node_types: &config.available_node_types,
            current_counts,
            pending_counts,
            resource_demand: self.resource_demand_vector.clone(),
            ensure_min_cluster_size: self.resource_demand_vector.clone(),
            upscaling_speed: config.effective_upscaling_speed(),
            cluster_max_workers: config.max_workers,
        };
        let to_launch = scheduler.get_nodes_to_launch(&scheduler_input);
        for (node_type, count) in &to_launch {
            let node_config = config
                .available_node_types
                .get(node_type)
                .map(|t| t.node_config.clone())
                .unwrap_or(serde_json::Value::Null);
            let launch_hash = crate::hash::launch_hash(&config.worker_nodes, Some(&node_config), &config.auth);
            self.launch_pool
                .launch_new_node(node_type, &node_config, *count, &launch_hash)
                .await;
            metrics::NODES_LAUNCH_REQUESTED.inc_by(*count as u64);
        }

        // Step 5 — reap updaters.
        let reaped = self.update_tracker.reap().await;
        for reaped_update in &reaped {
            let Some(node) = remaining_nodes.iter().find(|n| n.id == reaped_update.node_id) else {
                continue;
            };
            if let Some(ip) = &node.internal_ip {
                self.load_metrics.mark_active(ip, now);
            }
            if !reaped_update.success {
                continue;
            }
            let mut tags = crate::model::NodeTags::new();
            tags.insert(tag::RUNTIME_CONFIG.to_string(), reaped_update.runtime_hash.clone());
            tags.insert(tag::NODE_STATUS.to_string(), tag::STATUS_UP_TO_DATE.to_string());
            if let Some(hash) = &reaped_update.file_mounts_contents_hash {
                tags.insert(tag::FILE_MOUNTS_CONTENTS.to_string(), hash.clone());
            }
            if let Err(error) = provider.set_node_tags(&reaped_update.node_id, &tags).await {
                tracing::warn!(node_id = %reaped_update.node_id, %error, "failed to tag node after successful update");
            }
        }

        // Step 6 — dispatch updates.
        for node in &remaining_nodes {
            let prior_success = self.update_tracker.prior_success(&node.id);
            if !self.update_tracker.can_update(node, &config) {
                continue;
            }
            let instruction = should_update(
                node,
                &config,
                &runtime_hash,
                file_mounts_contents_hash.as_deref(),
                prior_success,
                config.restart_only,
                config.no_restart,
            );
            let Some(instruction) = instruction else {
                continue;
            };
            let spec = UpdateSpec {
                node_id: node.id.clone(),
                internal_ip: node.internal_ip.clone(),
                file_mounts: config.file_mounts.clone(),
                initialization_commands: Vec::new(),
                setup_commands: instruction.init_commands,
                ray_start_commands: instruction.start_ray_commands,
                runtime_hash: runtime_hash.clone(),
                file_mounts_contents_hash: file_mounts_contents_hash.clone(),
                docker_config: instruction.docker_config,
                use_internal_ip: true,
            };
            let handle = self.updater.start(spec);
            self.update_tracker.register(handle);
            metrics::UPDATERS_DISPATCHED.inc();
        }

        // Step 7 — recovery.
        for node in &remaining_nodes {
            self.recover_if_needed(node, &config, now).await;
        }

        let status = build_status_string(
            remaining_nodes.len(),
            self.update_tracker.updater_count(),
            self.update_tracker.total_failed_updates(),
            &self.load_metrics.info_string(),
        );
        self.debug_sink.put(KEY_AUTOSCALING_STATUS, status).await;

        Ok(())
    }

    async fn snapshot_workers(&self, provider: &Arc<dyn crate::provider::NodeProvider>) -> Result<Vec<NodeSnapshot>> {
        let mut filters = BTreeMap::new();
        filters.insert(tag::NODE_KIND.to_string(), "worker".to_string());
        let ids = provider.non_terminated_nodes(&filters).await.map_err(AutoscalerError::from)?;

        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            let tags = provider.node_tags(&id).await.map_err(AutoscalerError::from)?;
            let internal_ip = provider.internal_ip(&id).await.map_err(AutoscalerError::from)?;
            nodes.push(NodeSnapshot { id, tags, internal_ip });
        }
        Ok(nodes)
    }

    /// Dispatches a start-only recovery updater once a node's heartbeat
    /// goes stale past the configured timeout.
    async fn recover_if_needed(&mut self, node: &NodeSnapshot, config: &crate::model::ClusterConfig, now: i64) {
        if !self.update_tracker.can_update(node, config) {
            return;
        }
        let Some(ip) = &node.internal_ip else {
            return;
        };
        let last_heartbeat = *self
            .load_metrics
            .last_heartbeat_time_by_ip
            .entry(ip.clone())
            .or_insert(now);

        let timeout_secs = self.options.heartbeat_timeout.as_secs() as i64;
        if now - last_heartbeat <= timeout_secs {
            return;
        }

        tracing::warn!(node_id = %node.id, "heartbeat timeout exceeded, dispatching recovery updater");
        let spec = UpdateSpec {
            node_id: node.id.clone(),
            internal_ip: node.internal_ip.clone(),
            file_mounts: Default::default(),
            initialization_commands: Vec::new(),
            setup_commands: Vec::new(),
            ray_start_commands: config.worker_start_ray_commands.clone(),
            runtime_hash: self.config_refresher.runtime_hash().to_string(),
            file_mounts_contents_hash: None,
            docker_config: serde_json::Value::Null,
            use_internal_ip: true,
        };
        let handle = self.updater.start(spec);
        self.update_tracker.register(handle);
        metrics::RECOVERIES_DISPATCHED.inc();
    }
}

fn count_by_type(nodes: &[NodeSnapshot]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for node in nodes {
        if let Some(t) = node.node_type() {
            *counts.entry(t.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
