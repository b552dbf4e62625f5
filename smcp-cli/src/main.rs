//! SMCP CLI: evaluate and compare ML models from the terminal.
//!
//! Each invocation builds an in-process store from local files, runs the
//! pipeline and prints the result as JSON.

mod commands;

use clap::Parser;
use smcp_core::{Domain, Framework};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// SMCP: one comparable score for heterogeneous ML models
#[derive(Parser, Debug)]
#[command(name = "smcp", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Evaluate one model artifact against one CSV dataset
    Evaluate {
        /// Model artifact
        #[arg(short, long)]
        model: PathBuf,

        /// Task domain: classification, regression, text (nlp), vision (cv)
        #[arg(long)]
        domain: Domain,

        /// Declared framework: sklearn, pytorch, tensorflow, keras, onnx, native
        #[arg(short, long)]
        framework: Framework,

        /// CSV dataset
        #[arg(short, long)]
        dataset: PathBuf,

        /// Target column (defaults to `dataset.target_column`)
        #[arg(short, long)]
        target: Option<String>,

        /// Feature column to group by for the fairness report
        #[arg(long)]
        sensitive: Option<String>,
    },
    /// Evaluate and rank every pair listed in a TOML manifest
    Compare {
        /// Manifest with [[models]], [[datasets]] and optional [[pairs]]
        #[arg(short, long)]
        manifest: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // stdout carries results, so human-readable logs go to stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "smcp", "smcp")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "smcp.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let config = smcp_core::load_config(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    commands::handle_command(cli.command, config).await
}
