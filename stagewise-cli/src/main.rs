//! stagewise CLI: train, evaluate, and inspect staged models from JSON datasets.

mod commands;
mod config;
mod dataset;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// stagewise: staged learning-rate training for regression models
#[derive(Parser, Debug)]
#[command(name = "stagewise", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (default: ./stagewise.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Train a model and save a checkpoint
    Train {
        /// Training dataset (JSON)
        #[arg(short, long)]
        data: PathBuf,
        /// Held-out dataset to evaluate after training
        #[arg(long = "eval")]
        eval_data: Option<PathBuf>,
        /// Learning-rate stage to train (clamped to the schedule)
        #[arg(short, long)]
        stage: Option<usize>,
        /// Train every stage from the starting one to the last
        #[arg(long)]
        all_stages: bool,
    },
    /// Evaluate a saved checkpoint on a dataset
    Evaluate {
        /// Evaluation dataset (JSON)
        #[arg(short, long)]
        data: PathBuf,
        /// Checkpoint id, or "latest"
        #[arg(short = 'k', long, default_value = "latest")]
        checkpoint: String,
    },
    /// List saved checkpoints
    Checkpoints,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration file
    Init,
    /// Show the resolved configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let text_layer = (!cli.log_json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(EnvFilter::new(filter))
    });
    let json_layer = cli.log_json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(EnvFilter::new(filter))
    });

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command, cli.config.as_deref())
}
