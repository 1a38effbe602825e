use crate::agent::Policy;
use crate::bridge::BridgeSession;
use crate::config::Config;
use crate::sim::Simulation;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::net::SocketAddr;
use tracing::{error, info, warn};

mod agent;
mod beacon;
mod bridge;
mod config;
mod congestion;
mod medium;
mod mobility;
mod neighbor;
mod node;
mod occupancy;
mod protocol;
mod scenario;
mod sim;
mod state;
mod transport;

use clap::{Parser, Subcommand};

/// dcc-node: Decentralized Congestion Control for vehicular beaconing,
/// tunable live by an external agent
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a simulation
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
        /// Write the JSON run report here instead of stdout
        #[arg(short, long)]
        report: Option<String>,
    },
    /// Validate configuration file
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Serve the bridge protocol with a trivial policy
    Agent {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:5555")]
        listen: SocketAddr,
        /// Always answer with these thresholds (comma separated, 4 values)
        #[arg(long, value_delimiter = ',')]
        fixed: Option<Vec<f64>>,
        /// Seed for random actions
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run {
        config: "config.toml".to_string(),
        report: None,
    }) {
        Commands::Run { config, report } => run_simulation(&config, report.as_deref()).await,
        Commands::Validate { config } => validate_config(&config),
        Commands::Agent {
            listen,
            fixed,
            seed,
        } => run_agent(listen, fixed, seed).await,
    }
}

fn validate_config(path: &str) -> anyhow::Result<()> {
    match Config::load(path) {
        Ok(cfg) => {
            info!("Configuration '{}' is valid.", path);
            info!("Vehicles: {}", cfg.all_vehicles().len());
            info!("Duration: {:?}", cfg.simulation.duration);
            info!(
                "Bridge: {}",
                if cfg.bridge.enable { "enabled" } else { "disabled" }
            );
            Ok(())
        }
        Err(e) => {
            error!("Configuration '{}' is INVALID: {}", path, e);
            Err(anyhow::anyhow!("Invalid config"))
        }
    }
}

async fn run_simulation(config_path: &str, report_path: Option<&str>) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .map_err(|e| anyhow::anyhow!("Failed to load '{}': {}", config_path, e))?;

    let bridge = BridgeSession::connect(&config.bridge, config.dcc.thresholds).await?;
    let mut sim = Simulation::new(&config, bridge);
    sim.start().await?;

    // Signal handling
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let outcome = tokio::select! {
        res = sim.run() => res,
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
            Ok(())
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
            Ok(())
        }
    };
    if let Err(e) = outcome {
        error!("Simulation aborted: {}", e);
        return Err(e.into());
    }

    let report = sim.finish().await?;
    info!(
        "Finished at {:.1}s after {} events, {} bridge steps",
        report.simulated_secs, report.events_processed, report.bridge_steps
    );

    let json = serde_json::to_string_pretty(&report)?;
    match report_path {
        Some(path) => {
            std::fs::write(path, json)?;
            info!("Report written to '{}'", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn run_agent(listen: SocketAddr, fixed: Option<Vec<f64>>, seed: u64) -> anyhow::Result<()> {
    let policy = match fixed {
        Some(values) => {
            let values: [f64; 4] = values
                .try_into()
                .map_err(|v: Vec<f64>| anyhow::anyhow!("--fixed needs 4 values, got {}", v.len()))?;
            info!("Answering with fixed thresholds {:?}", values);
            Policy::Fixed(values)
        }
        None => {
            warn!("No --fixed thresholds, answering with random actions");
            Policy::Random(StdRng::seed_from_u64(seed))
        }
    };
    let listener = transport::bind_listener(listen)?;
    agent::run(listener, policy).await
}
