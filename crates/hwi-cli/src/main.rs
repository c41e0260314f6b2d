//! hwi-bridge - share one lighting panel connection between local processes.
//!
//! `serve` owns the panel link (or, with `commMode: "ipc"`, joins a running
//! bridge as a satellite) and logs level changes for configured circuits.
//! `dim` and `query` send a single command through the configured route.

mod bridge;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hwi_core::{BridgeConfig, CanonicalAddress};
use hwi_core::constants::MAX_DIM_LEVEL;
use hwi_protocol::{Command as PanelCommand, LightingEvent};
use std::path::PathBuf;
use tracing::info;

use crate::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "hwi-bridge", version, about = "Lighting panel bridge")]
struct Cli {
    /// Bridge configuration file (JSON)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `hwi_network=trace` (RUST_LOG wins)
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and run until Ctrl-C
    Serve,

    /// Fade a circuit to a level
    Dim {
        /// Circuit address, e.g. 1.1.2.4
        #[arg(long)]
        address: String,

        /// Target level (0-100)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=MAX_DIM_LEVEL as i64))]
        level: u8,

        /// Fade time in seconds [default: per circuit, else 2]
        #[arg(long)]
        fade: Option<u32>,
    },

    /// Ask the panel for a circuit's level
    Query {
        /// Circuit address, e.g. 1.1.2.4
        #[arg(long)]
        address: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<BridgeConfig> {
    let config = match path {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn parse_address(address: &str) -> Result<CanonicalAddress> {
    CanonicalAddress::parse(address).with_context(|| format!("invalid circuit address {address}"))
}

fn print_level(reply: Option<LightingEvent>) {
    match reply {
        Some(LightingEvent::DimLevel { address, level }) => println!("{address} {level}"),
        None => println!("no level reported"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = load_config(cli.config.as_ref())?;
    info!(mode = %config.comm_mode, panel = %config.panel_addr(), "Starting hwi-bridge");

    match cli.command {
        Command::Serve => bridge::serve(config).await,
        Command::Dim {
            address,
            level,
            fade,
        } => {
            let canonical = parse_address(&address)?;
            let circuits = bridge::load_circuits(&config);
            let command = bridge::dim_command(&circuits, &address, level, fade);
            let reply = bridge::one_shot(config, command, &canonical).await?;
            print_level(reply);
            Ok(())
        }
        Command::Query { address } => {
            let canonical = parse_address(&address)?;
            let command = PanelCommand::read_dim_level(&address);
            let reply = bridge::one_shot(config, command, &canonical).await?;
            print_level(reply);
            Ok(())
        }
    }
}
