mod builder;
mod config;
mod connections;
mod departures;
mod graph_tile;
mod ids;
mod merge;
mod service_days;
mod tile_store;
mod transit_format;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::config::Config;

/// Adds transit stops, lines and schedules to prebuilt road graph tiles.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to the JSON build configuration.
    #[arg(long)]
    config: PathBuf,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .target(env_logger::Target::Stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    info!("Adding transit to graph tiles in {}", config.tile_dir.display());
    builder::build(&config)
}
