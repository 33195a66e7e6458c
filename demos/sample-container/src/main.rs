//! Sample container: hosts a few [`SampleAgent`]s behind the gateway.

mod sample;

use std::path::PathBuf;

use agent_container::config::ContainerConfig;
use agent_container::gateway::{ErrorStatusMap, Gateway, serve};
use agent_container::primitives::{AgentId, ContainerImage};
use agent_container::telemetry::{TelemetryConfig, init_tracing};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::sample::SampleAgent;

const DEFAULT_IMAGE: &str = include_str!("../sample-image.json");

#[derive(Debug, Parser)]
#[command(version, about = "Runs sample agents behind the container API")]
struct Cli {
    /// Port to listen on. Defaults to API_PORT or 8082.
    #[arg(long)]
    port: Option<u16>,
    /// Container image description (JSON). Defaults to the bundled sample image.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Number of sample agents to start.
    #[arg(long, default_value_t = 2)]
    agents: usize,
    /// Log filter, e.g. `debug` or `agent_gateway=trace`. Overrides RUST_LOG.
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::new();
    if let Some(filter) = &cli.log {
        telemetry = telemetry.with_filter(filter.clone());
    }
    init_tracing(&telemetry)?;

    let config = ContainerConfig::from_env()?;
    let image = match &cli.image {
        Some(path) => ContainerImage::from_json_file(path)?,
        None => ContainerImage::from_json(DEFAULT_IMAGE)?,
    };
    let port = cli.port.unwrap_or(config.api_port);

    let gateway = Gateway::builder(config, image)
        .status_map(ErrorStatusMap::default().with("io", 502))
        .build()?;

    for n in 1..=cli.agents {
        let agent_id = AgentId::new(format!("sample{n}"))?;
        gateway.spawn_agent(agent_id, SampleAgent::new()).await?;
    }
    let renewal = gateway.start_renewal();

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    serve(gateway.clone(), listener, shutdown_signal()).await?;

    if let Some(renewal) = renewal {
        renewal.abort();
    }
    gateway.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => warn!(%err, "failed to listen for ctrl-c; shutting down"),
    }
}
