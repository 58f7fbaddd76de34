//! Knit simulation runner.
//!
//! # Usage
//!
//! ```bash
//! # Default scenario: 2 clients, 60 frames
//! knit-sim
//!
//! # Scenario file with overrides
//! knit-sim --scenario lossy.toml --loss 0.25 --seed 9
//! ```

use std::path::PathBuf;

use clap::Parser;
use knit_harness::{ScenarioConfig, scenario};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Runs the demo points service against simulated clients
#[derive(Parser, Debug)]
#[command(name = "knit-sim")]
#[command(about = "Deterministic Knit client/server simulation")]
#[command(version)]
struct Args {
    /// Scenario file (TOML)
    #[arg(short, long)]
    scenario: Option<PathBuf>,

    /// Frames to simulate
    #[arg(short, long)]
    frames: Option<u64>,

    /// Connected clients
    #[arg(short, long)]
    clients: Option<usize>,

    /// Drop probability for unreliable signals
    #[arg(long)]
    loss: Option<f64>,

    /// Seed of the loss model
    #[arg(long)]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = match &args.scenario {
        Some(path) => ScenarioConfig::load(path)?,
        None => ScenarioConfig::default(),
    };
    if let Some(frames) = args.frames {
        config.frames = frames;
    }
    if let Some(clients) = args.clients {
        config.clients = clients;
    }
    if let Some(loss) = args.loss {
        config.loss = loss;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let report = scenario::run(&config).await?;

    for client in &report.clients {
        tracing::info!(
            peer = client.peer,
            total = ?client.observed_total,
            pings = client.pings,
            scored = client.scored,
            render_frames = client.render_frames,
            faults = client.faults,
            "client report"
        );
    }
    tracing::info!(
        frames = report.frames,
        total = report.server_total,
        delivered = report.network.delivered,
        dropped = report.network.dropped,
        faults = report.server_faults,
        "server report"
    );

    Ok(())
}
