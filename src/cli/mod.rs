mod simulation;

pub use simulation::{run as run_simulation, PieceOrder, SimulationOptions, SimulationReport};

use crate::config::SchedulerConfig;
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "bittorrent-swarm")]
#[command(about = "Per-torrent swarm scheduler for BitTorrent peers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download from a simulated swarm of in-process peers
    Simulate {
        /// Number of remote peers
        #[arg(short, long, default_value = "8")]
        peers: usize,

        /// Number of pieces in the torrent
        #[arg(long, default_value = "64")]
        pieces: usize,

        /// Chance that a remote peer has any given piece
        #[arg(long, default_value = "0.5")]
        coverage: f64,

        /// Order in which pieces are handed out to peers
        #[arg(long, value_enum, default_value_t = PieceOrder::RarestFirst)]
        order: PieceOrder,

        /// Maximum number of peers downloading at once
        #[arg(short, long)]
        max_active: Option<usize>,

        /// Seconds without a block before a peer's assignment is reclaimed
        #[arg(short, long)]
        receiving_timeout: Option<u64>,

        /// JSON file with scheduler settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seed for the random peer bitfields
        #[arg(long)]
        seed: Option<u64>,

        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        deadline: u64,
    },

    /// Print the effective scheduler configuration
    Config {
        /// JSON file with scheduler settings
        config: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Simulate {
                peers,
                pieces,
                coverage,
                order,
                max_active,
                receiving_timeout,
                config,
                seed,
                deadline,
            } => {
                let mut scheduler_config = load_config(config.as_ref())?;
                if let Some(max_active) = max_active {
                    scheduler_config.max_concurrently_active_peer_connections_per_torrent =
                        *max_active;
                }
                if let Some(secs) = receiving_timeout {
                    scheduler_config.max_piece_receiving_time = Duration::from_secs(*secs);
                }

                let report = run_simulation(SimulationOptions {
                    peers: *peers,
                    pieces: *pieces,
                    coverage: coverage.clamp(0.0, 1.0),
                    order: *order,
                    seed: *seed,
                    deadline: Duration::from_secs(*deadline),
                    config: scheduler_config,
                })
                .await?;

                self.show_report(&report);
            }

            Commands::Config { config } => {
                let scheduler_config = load_config(config.as_ref())?;
                println!("{}", serde_json::to_string_pretty(&scheduler_config)?);
            }
        }

        Ok(())
    }

    fn show_report(&self, report: &SimulationReport) {
        info!("Simulation finished in {:.2?}", report.elapsed);

        println!("Swarm Simulation");
        println!("================");
        println!("Torrent: {}", report.torrent_id);
        println!("Pieces: {}", report.pieces_total);
        println!("Available in swarm: {}", report.pieces_available);
        println!("Downloaded: {}", report.pieces_downloaded);
        println!("Elapsed: {:.2?}", report.elapsed);
        if !report.is_complete() {
            println!("Deadline reached before all available pieces arrived");
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SchedulerConfig> {
    match path {
        Some(path) => SchedulerConfig::from_json_file(path),
        None => Ok(SchedulerConfig::default()),
    }
}
