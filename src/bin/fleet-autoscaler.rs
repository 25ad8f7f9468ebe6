//! Daemon entry point: wires up logging, metrics, the HTTP probe/admin
//! server, and drives the reconciler tick loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleet_autoscaler::autoscaler::reconciler::{Autoscaler, AutoscalerOptions};
use fleet_autoscaler::autoscaler::status::InMemoryDebugSink;
use fleet_autoscaler::config::refresher::ConfigRefresher;
use fleet_autoscaler::provider::kubernetes::KubernetesNodeProvider;
use fleet_autoscaler::provider::memory::MemoryNodeProvider;
use fleet_autoscaler::provider::NodeProvider;
use fleet_autoscaler::server::{build_router, ServerState};
use fleet_autoscaler::updater::{ShellCommandUpdater, Updater};
use tokio::sync::Mutex;

#[derive(Debug, Parser)]
#[command(name = "fleet-autoscaler", about = "Autoscaling control loop for an elastic compute cluster")]
struct Args {
    /// Path to the YAML cluster config file.
    #[arg(long, env = "FLEET_CONFIG_PATH")]
    config: std::path::PathBuf,

    /// Namespace the Kubernetes node provider manages.
    #[arg(long, env = "FLEET_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Use the in-memory provider instead of Kubernetes (local/dry-run testing).
    #[arg(long, env = "FLEET_DRY_RUN", default_value_t = false)]
    dry_run: bool,

    /// HTTP port for `/healthz`, `/readyz`, `/metrics`, `/status`, `/admin/*`.
    #[arg(long, env = "FLEET_METRICS_PORT", default_value_t = fleet_autoscaler::constants::DEFAULT_METRICS_PORT)]
    metrics_port: u16,

    /// Consecutive tick failures tolerated before the process exits.
    #[arg(long, env = "FLEET_MAX_FAILURES", default_value_t = fleet_autoscaler::constants::DEFAULT_MAX_FAILURES)]
    max_failures: u32,

    /// Minimum seconds between the start of two successful ticks.
    #[arg(long, env = "FLEET_UPDATE_INTERVAL_SECS", default_value_t = fleet_autoscaler::constants::DEFAULT_UPDATE_INTERVAL_SECS)]
    update_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    fleet_autoscaler::observability::metrics::register_all();

    let is_ready = Arc::new(AtomicBool::new(false));
    let debug_sink = Arc::new(InMemoryDebugSink::new());

    let dry_run = args.dry_run;
    let namespace = args.namespace.clone();
    let provider_factory: fleet_autoscaler::config::refresher::ProviderFactory = if dry_run {
        Box::new(|_config| Arc::new(MemoryNodeProvider::new()) as Arc<dyn NodeProvider>)
    } else {
        Box::new(move |_config| {
            let namespace = namespace.clone();
            let client = futures::executor::block_on(kube::Client::try_default())
                .expect("failed to construct default Kubernetes client");
            Arc::new(KubernetesNodeProvider::new(client, namespace, serde_json::Value::Null)) as Arc<dyn NodeProvider>
        })
    };

    let config_refresher =
        ConfigRefresher::new(args.config.clone(), provider_factory).context("constructing config refresher")?;

    let updater: Arc<dyn Updater> = Arc::new(ShellCommandUpdater { head_node_ip: None });

    let options = AutoscalerOptions {
        update_interval: std::time::Duration::from_secs(args.update_interval_secs),
        max_failures: args.max_failures,
        ..AutoscalerOptions::default()
    };

    let autoscaler = Arc::new(Mutex::new(Autoscaler::new(
        config_refresher,
        updater,
        debug_sink.clone(),
        options,
    )));

    let server_state = ServerState {
        is_ready: Arc::clone(&is_ready),
        debug_sink: debug_sink.clone(),
        autoscaler: Arc::clone(&autoscaler),
    };
    let router = build_router(server_state);
    let metrics_port = args.metrics_port;
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(("0.0.0.0", metrics_port)).await {
            Ok(listener) => listener,
            Err(error) => {
                tracing::error!(%error, "failed to bind probe server");
                return;
            }
        };
        if let Err(error) = axum::serve(listener, router).await {
            tracing::error!(%error, "probe server exited");
        }
    });

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let mut guard = autoscaler.lock().await;
        if let Err(error) = guard.update().await {
            tracing::error!(%error, "failure budget exceeded, exiting");
            return Err(error.into());
        }
        drop(guard);
        is_ready.store(true, Ordering::SeqCst);
    }
}
