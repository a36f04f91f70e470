//! Fieldline CLI: command-line driver for the Fieldline transformation engine.
//!
//! Runs configured jobs over delimited files, proposes field mappings and
//! reports detected source formats.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Fieldline: field-level transformation, validation and lineage for data migrations
#[derive(Parser, Debug)]
#[command(name = "fieldline", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Directory for JSON log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Transform, validate and merge input files into an output directory
    Run {
        /// Job configuration file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output directory for rows, error rows, lineage and the run summary
        #[arg(short, long, default_value = "fieldline-out")]
        output: PathBuf,
        /// Input files, processed in the given order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Propose a source-to-target mapping for one input file
    Map {
        /// Job configuration file declaring the target fields
        #[arg(short, long)]
        config: Option<PathBuf>,
        input: PathBuf,
    },
    /// Show the detected encoding, delimiter and header of an input file
    Detect {
        #[arg(short, long)]
        config: Option<PathBuf>,
        input: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default job configuration
    Init {
        #[arg(default_value = "fieldline.toml")]
        path: PathBuf,
    },
    /// Print the effective configuration after all layers are merged
    Show {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    let log_dir = cli.log_dir.clone().unwrap_or_else(|| {
        directories::ProjectDirs::from("dev", "fieldline", "fieldline")
            .map(|d| d.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "fieldline.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command).await
}
