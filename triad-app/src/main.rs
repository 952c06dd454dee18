//! Triad Application
//!
//! Command-line front end for tiled scene data:
//! - `parts`: list the spatial parts and the cameras that see them
//! - `export`: write per-part artifacts from a fresh or resumed model
//! - `merge`: combine clipped part artifacts into one point cloud

mod app;
mod errors;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Triad - Tiled Gaussian Splatting scene tools
#[derive(Parser, Debug)]
#[command(name = "triad")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON file with model parameters
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Dataset directory (overrides the config file)
    #[arg(short, long, global = true)]
    pub source: Option<PathBuf>,

    /// Output directory (overrides the config file)
    #[arg(short, long, global = true)]
    pub model: Option<PathBuf>,

    /// Seed for camera shuffling and random initial clouds
    #[arg(long, global = true, default_value_t = 0)]
    pub seed: u64,

    /// Checkpoint to start from: -1 for the latest, 0 for a fresh run (not accepted by `merge`)
    #[arg(long, global = true, default_value_t = 0, allow_negative_numbers = true)]
    pub load_iteration: i64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List parts with their bounds and visible camera counts
    Parts,

    /// Save every part's artifacts at an iteration
    Export {
        #[arg(long)]
        iteration: u32,

        /// Only export the named part
        #[arg(long)]
        part: Option<String>,
    },

    /// Merge the clipped part artifacts of an iteration
    Merge {
        #[arg(long)]
        iteration: u32,
    },
}

fn main() {
    let args = Args::parse();
    app::init_logging(&args.log_level);

    if let Err(e) = app::run(args) {
        eprintln!("Application error: {}", errors::report(&e));
        std::process::exit(1);
    }
}
