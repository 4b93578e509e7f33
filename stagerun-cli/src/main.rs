//! stagerun CLI: run, plan and inspect staged experiments.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// stagerun: resumable, checkpointed staged experiments
#[derive(Parser, Debug)]
#[command(name = "stagerun", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Run-mode flags shared by `run` and `plan`.
#[derive(clap::Args, Debug, Clone, Default)]
pub(crate) struct ModeArgs {
    /// Resume after the phase that produced this checkpoint
    #[arg(long, value_name = "CHECKPOINT")]
    resume_from: Option<String>,

    /// Build the network, checkpoint it and stop
    #[arg(long)]
    create_only: bool,

    /// Run inference from the fully trained checkpoint
    #[arg(long)]
    infer_only: bool,

    /// Save a checkpoint after every phase
    #[arg(long)]
    checkpoint: bool,

    /// Cap every step at a handful of iterations
    #[arg(long)]
    test_mode: bool,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run the experiment
    Run {
        #[command(flatten)]
        mode: ModeArgs,
        /// Pipeline definition (YAML); the built-in pipeline when omitted
        #[arg(long)]
        pipeline: Option<PathBuf>,
        /// JSON-lines record file for the replay engine
        #[arg(long)]
        records: Option<PathBuf>,
        /// Write experiment results to this file
        #[arg(long)]
        results: Option<PathBuf>,
    },
    /// Show which phases would run and which checkpoint would be loaded
    Plan {
        #[command(flatten)]
        mode: ModeArgs,
    },
    /// List stored checkpoints
    Checkpoints,
    /// Parse and validate a pipeline definition
    Validate {
        /// Path to the YAML file
        file: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write a default .stagerun/config.toml in the workspace
    Init,
    /// Print the merged configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

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
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "stagerun", "stagerun")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "stagerun.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace).await
}
