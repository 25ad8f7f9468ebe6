//! End-to-end scenarios against the in-memory node provider, covering the
//! six scenarios and the invariants they exercise.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use fleet_autoscaler::autoscaler::reconciler::{Autoscaler, AutoscalerOptions};
use fleet_autoscaler::autoscaler::status::{InMemoryDebugSink, DebugSink, KEY_AUTOSCALING_STATUS};
use fleet_autoscaler::config::refresher::ConfigRefresher;
use fleet_autoscaler::model::{tag, NodeId, NodeTags};
use fleet_autoscaler::provider::memory::MemoryNodeProvider;
use fleet_autoscaler::provider::NodeProvider;
use fleet_autoscaler::updater::NoopUpdater;

fn write_temp_config(contents: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let path = std::env::temp_dir().join(format!("fleet-autoscaler-test-{nanos}.yaml"));
    std::fs::write(&path, contents).expect("failed to write temp config");
    path
}

fn cold_start_config() -> String {
    r#"
max_workers: 10
idle_timeout_minutes: 5
available_node_types:
  A:
    resources:
      CPU: 4.0
    node_config: {}
    min_workers: 2
    max_workers: 5
"#
    .to_string()
}

async fn build_autoscaler(
    config: &str,
    provider: MemoryNodeProvider,
    options: AutoscalerOptions,
) -> (Autoscaler, MemoryNodeProvider, Arc<InMemoryDebugSink>) {
    let path = write_temp_config(config);
    let provider_for_factory = provider.clone();
    let factory: fleet_autoscaler::config::refresher::ProviderFactory =
        Box::new(move |_config| Arc::new(provider_for_factory.clone()) as Arc<dyn NodeProvider>);
    let refresher = ConfigRefresher::new(path, factory).expect("config refresher construction");
    let updater = Arc::new(NoopUpdater);
    let debug_sink = Arc::new(InMemoryDebugSink::new());
    let autoscaler = Autoscaler::new(refresher, updater, debug_sink.clone(), options);
    (autoscaler, provider, debug_sink)
}

fn fast_options() -> AutoscalerOptions {
    AutoscalerOptions {
        update_interval: std::time::Duration::from_secs(0),
        ..AutoscalerOptions::default()
    }
}

#[tokio::test]
async fn cold_start_launches_min_workers() {
    let provider = MemoryNodeProvider::new();
    let (mut autoscaler, provider, _debug_sink) = build_autoscaler(&cold_start_config(), provider, fast_options()).await;

    autoscaler.update().await.expect("tick should succeed");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(provider.node_count().await, 2);
}

#[tokio::test]
async fn idle_reclamation_keeps_most_recently_used() {
    let config = r#"
max_workers: 5
idle_timeout_minutes: 5
available_node_types:
  A:
    resources:
      CPU: 4.0
    node_config: {}
    min_workers: 2
    max_workers: 5
"#;
    let expected_launch_hash = fleet_autoscaler::hash::launch_hash(
        &serde_json::Value::Null,
        Some(&serde_json::Value::Object(Default::default())),
        &serde_json::Value::Null,
    );
    let provider = MemoryNodeProvider::new();
    for i in 0..5 {
        let mut tags = NodeTags::new();
        tags.insert(tag::NODE_KIND.to_string(), "worker".to_string());
        tags.insert(tag::USER_NODE_TYPE.to_string(), "A".to_string());
        tags.insert(tag::LAUNCH_CONFIG.to_string(), expected_launch_hash.clone());
        provider
            .seed_node(NodeId::from(format!("n{i}")), tags, Some(format!("10.0.0.{i}")))
            .await;
    }

    let (mut autoscaler, provider, _debug_sink) = build_autoscaler(config, provider, fast_options()).await;

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
    let ten_minutes_ago = now - 600;
    for i in 0..5 {
        autoscaler
            .load_metrics_mut()
            .last_used_time_by_ip
            .insert(format!("10.0.0.{i}"), ten_minutes_ago + i as i64);
    }

    autoscaler.update().await.expect("tick should succeed");

    // 3 terminations expected: 5 idle workers, min_workers=2 protects the
    // 2 most-recently-used.
    assert_eq!(provider.node_count().await, 2);
}

#[tokio::test]
async fn update_dispatch_spawns_updater_for_stale_runtime_hash() {
    let config = cold_start_config();
    let provider = MemoryNodeProvider::new();
    let mut tags = NodeTags::new();
    tags.insert(tag::NODE_KIND.to_string(), "worker".to_string());
    tags.insert(tag::USER_NODE_TYPE.to_string(), "A".to_string());
    // RAY_LAUNCH_CONFIG matches so the node survives Step 2; RAY_RUNTIME_CONFIG
    // is absent so files_up_to_date is false and should_update fires.
    let expected_launch_hash =
        fleet_autoscaler::hash::launch_hash(&serde_json::Value::Null, Some(&serde_json::Value::Object(Default::default())), &serde_json::Value::Null);
    tags.insert(tag::LAUNCH_CONFIG.to_string(), expected_launch_hash);
    provider
        .seed_node(NodeId::from("stale"), tags, Some("10.0.0.50".to_string()))
        .await;

    let (mut autoscaler, provider, debug_sink) = build_autoscaler(&config, provider, fast_options()).await;
    autoscaler.update().await.expect("tick should succeed");
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // A NoopUpdater run completes immediately; by the next reap the node
    // should have one recorded successful update and zero failures.
    autoscaler.update().await.expect("second tick should succeed");

    let status = debug_sink
        .get(KEY_AUTOSCALING_STATUS)
        .await
        .expect("status should be published after a tick");
    assert!(
        status.contains("0 failed update(s)"),
        "expected no failed updates, got: {status}"
    );

    let tags = provider
        .node_tags(&NodeId::from("stale"))
        .await
        .expect("seeded node should still exist");
    assert!(
        tags.get(tag::NODE_STATUS).map(String::as_str) == Some(tag::STATUS_UP_TO_DATE),
        "expected the stale node to be tagged up-to-date after its updater ran, got tags: {tags:?}"
    );
}

#[tokio::test]
async fn heartbeat_recovery_dispatches_start_only_updater() {
    let config = cold_start_config();
    let provider = MemoryNodeProvider::new();
    let mut tags = NodeTags::new();
    tags.insert(tag::NODE_KIND.to_string(), "worker".to_string());
    tags.insert(tag::USER_NODE_TYPE.to_string(), "A".to_string());
    let expected_launch_hash = fleet_autoscaler::hash::launch_hash(
        &serde_json::Value::Null,
        Some(&serde_json::Value::Object(Default::default())),
        &serde_json::Value::Null,
    );
    tags.insert(tag::LAUNCH_CONFIG.to_string(), expected_launch_hash);
    tags.insert(tag::NODE_STATUS.to_string(), tag::STATUS_UP_TO_DATE.to_string());
    provider
        .seed_node(NodeId::from("recoverable"), tags, Some("10.0.0.60".to_string()))
        .await;

    let options = AutoscalerOptions {
        heartbeat_timeout: std::time::Duration::from_secs(1),
        ..fast_options()
    };
    let (mut autoscaler, provider, _debug_sink) = build_autoscaler(&config, provider, options).await;

    // RAY_RUNTIME_CONFIG is absent until a successful updater reap tags it,
    // so its presence after the sequence below is proof a recovery updater
    // actually ran rather than just that the tick didn't error.
    assert!(provider
        .node_tags(&NodeId::from("recoverable"))
        .await
        .unwrap()
        .get(tag::RUNTIME_CONFIG)
        .is_none());

    autoscaler.update().await.expect("first tick seeds grace period");
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    autoscaler.update().await.expect("second tick should trigger recovery");
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    // Third tick's Step 5 reaps the recovery updater registered above.
    autoscaler.update().await.expect("third tick should reap the recovery updater");

    let tags = provider.node_tags(&NodeId::from("recoverable")).await.unwrap();
    assert!(
        tags.contains_key(tag::RUNTIME_CONFIG),
        "expected the recovery updater to have been dispatched and reaped successfully, got tags: {tags:?}"
    );
}

#[tokio::test]
async fn request_resources_protects_sufficient_node() {
    let config = r#"
max_workers: 10
idle_timeout_minutes: 5
available_node_types:
  A:
    resources:
      CPU: 8.0
    node_config: {}
    min_workers: 0
    max_workers: 10
"#;
    let expected_launch_hash = fleet_autoscaler::hash::launch_hash(
        &serde_json::Value::Null,
        Some(&serde_json::Value::Object(Default::default())),
        &serde_json::Value::Null,
    );
    let provider = MemoryNodeProvider::new();
    for i in 0..10 {
        let mut tags = NodeTags::new();
        tags.insert(tag::NODE_KIND.to_string(), "worker".to_string());
        tags.insert(tag::USER_NODE_TYPE.to_string(), "A".to_string());
        tags.insert(tag::LAUNCH_CONFIG.to_string(), expected_launch_hash.clone());
        provider
            .seed_node(NodeId::from(format!("n{i}")), tags, Some(format!("10.0.1.{i}")))
            .await;
    }

    let (mut autoscaler, provider, _debug_sink) = build_autoscaler(config, provider, fast_options()).await;

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
    let ten_minutes_ago = now - 600;
    for i in 0..10 {
        autoscaler
            .load_metrics_mut()
            .last_used_time_by_ip
            .insert(format!("10.0.1.{i}"), ten_minutes_ago);
    }

    let mut bundle = fleet_autoscaler::model::ResourceBundle::new();
    bundle.insert("CPU".to_string(), 4.0);
    autoscaler.request_resources(vec![bundle]);

    autoscaler.update().await.expect("tick should succeed");

    // 9 idle workers terminated; exactly 1 kept to satisfy the request.
    assert_eq!(provider.node_count().await, 1);
}

#[tokio::test]
async fn kill_workers_terminates_the_whole_fleet() {
    let provider = MemoryNodeProvider::new();
    for i in 0..3 {
        let mut tags = NodeTags::new();
        tags.insert(tag::NODE_KIND.to_string(), "worker".to_string());
        provider
            .seed_node(NodeId::from(format!("n{i}")), tags, Some(format!("10.0.2.{i}")))
            .await;
    }
    let (autoscaler, provider, _debug_sink) = build_autoscaler(&cold_start_config(), provider, fast_options()).await;
    autoscaler.kill_workers().await;
    assert_eq!(provider.node_count().await, 0);
}
