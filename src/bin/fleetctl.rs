//! `fleetctl`: a small CLI that drives a running `fleet-autoscaler` daemon's
//! admin HTTP surface. Mirrors this codebase's pattern of a thin client
//! binary kept separate from the long-running daemon.

use clap::{Parser, Subcommand};
use fleet_autoscaler::model::ResourceBundle;

#[derive(Debug, Parser)]
#[command(name = "fleetctl", about = "Control a running fleet-autoscaler daemon")]
struct Cli {
    /// Base URL of the daemon's admin server, e.g. http://localhost:8080.
    #[arg(long, env = "FLEETCTL_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the cluster's current status summary.
    Status,
    /// Replace the externally requested resource demand vector.
    RequestResources {
        /// Resource bundle as `NAME=AMOUNT` pairs, e.g. `CPU=4 GPU=1`.
        #[arg(required = true)]
        resources: Vec<String>,
    },
    /// Terminate every managed worker.
    KillWorkers,
    /// Force one reconciliation cycle immediately.
    Tick,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Command::Status => {
            let body = client
                .get(format!("{}/status", cli.endpoint))
                .send()
                .await?
                .text()
                .await?;
            println!("{body}");
        }
        Command::RequestResources { resources } => {
            let bundle = parse_resource_bundle(&resources)?;
            let response = client
                .post(format!("{}/admin/request-resources", cli.endpoint))
                .json(&serde_json::json!({ "bundles": [bundle] }))
                .send()
                .await?;
            println!("request-resources: {}", response.status());
        }
        Command::KillWorkers => {
            let response = client
                .post(format!("{}/admin/kill-workers", cli.endpoint))
                .send()
                .await?;
            println!("kill-workers: {}", response.status());
        }
        Command::Tick => {
            let response = client.post(format!("{}/admin/tick", cli.endpoint)).send().await?;
            println!("tick: {}", response.status());
        }
    }

    Ok(())
}

fn parse_resource_bundle(pairs: &[String]) -> anyhow::Result<ResourceBundle> {
    let mut bundle = ResourceBundle::new();
    for pair in pairs {
        let (name, amount) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected NAME=AMOUNT, got {pair}"))?;
        let amount: f64 = amount
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid amount in {pair}"))?;
        bundle.insert(name.to_string(), amount);
    }
    Ok(bundle)
}
