//! SagaLedger Simulator
//!
//! Drives scripted and randomized transfers through an in-process coordinator
//! and checks that money is conserved.

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// SagaLedger Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "SagaLedger transfer simulation")]
struct Args {
    /// Scenario to run: happy-path, insufficient-funds, duplicate-storm or random
    #[arg(short, long, default_value = "happy-path")]
    scenario: String,

    /// Accounts to open (random scenario)
    #[arg(short, long, default_value = "4")]
    accounts: usize,

    /// Transfers to start (random scenario)
    #[arg(short, long, default_value = "50")]
    transfers: usize,

    /// Opening balance per account (random scenario)
    #[arg(long, default_value = "1000")]
    initial_balance: u64,

    /// Probability of duplicate event delivery (random scenario)
    #[arg(long, default_value = "0.0")]
    duplicate_rate: f64,

    /// Simulation speed multiplier, divides retry backoffs
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting SagaLedger Simulator");

    let scenario = if args.scenario == "random" {
        let mut rng = match args.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Scenario::random(
            &mut rng,
            args.accounts,
            args.transfers,
            args.initial_balance,
            args.duplicate_rate,
        )
    } else {
        Scenario::load(&args.scenario)?
    };

    let controller = SimulationController::new(scenario, args.speed)?;
    let report = controller.run().await?;

    info!("Simulation complete");
    info!("Transfers: {}", report.transfers.total_transfers);
    info!("Completed: {}", report.transfers.completed_transfers);
    info!("Cancelled: {}", report.transfers.cancelled_transfers);
    info!("Average latency: {}ms", report.transfers.average_latency_ms());
    info!("Completion rate: {:.2}", report.transfers.completion_rate());

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_consistent() {
        error!(
            funded = %report.funded,
            held = %report.held,
            reserved = %report.reserved,
            "Money not conserved"
        );
        return Err(anyhow::anyhow!("Simulation ended inconsistent"));
    }

    Ok(())
}
