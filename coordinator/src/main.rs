//! SagaLedger Coordinator Binary
//!
//! Reads one JSON command per line from stdin and writes one JSON reply per
//! line to stdout. Logs go to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sagaledger_coordinator::commands::{self, Reply};
use sagaledger_coordinator::{Coordinator, CoordinatorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = CoordinatorConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    info!("Starting SagaLedger Coordinator");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    // Generate node ID if not provided
    let node_id = config
        .node_id
        .clone()
        .unwrap_or_else(|| format!("coordinator-{}", uuid::Uuid::now_v7()));

    info!(node_id = %node_id, "Node ID assigned");

    let coordinator = Arc::new(Coordinator::new(config, node_id.clone()));
    coordinator.start().await?;

    info!(node_id = %node_id, "Coordinator running, reading commands from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        };
        let Some(line) = line else {
            info!("Command stream closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match commands::parse(&line) {
            Ok(command) => commands::run(&coordinator, command).await,
            Err(e) => {
                warn!(error = %e, "Malformed command");
                Reply::malformed(e.to_string())
            }
        };

        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    if let Err(e) = coordinator.stop().await {
        error!(error = %e, "Error during shutdown");
    }

    info!(metrics = ?coordinator.metrics(), "Coordinator shutdown complete");
    Ok(())
}
