//! Shield CLI - train, verify and fetch the on-device content classifier
//!
//! Provides a `shield` command wrapping the `shield-training` pipeline.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::types::{ConfigArgs, FetchArgs, InspectArgs, PrepareArgs, SourcesArgs, TrainArgs};
use commands::{config as config_cmd, fetch, inspect, prepare, sources, train};

/// Shield - image classifier training for content screening
#[derive(Parser, Debug)]
#[command(name = "shield", author, version, about = "Shield - train and verify the on-device content classifier")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Pipeline root directory (defaults to the current directory)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Configuration file (defaults to <root>/shield.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download every dataset, train the classifier and export it
    ///
    /// Wipes the corpus directory, pulls each registered source, splits the
    /// images 80/10/10, trains, evaluates on the held-out split and writes
    /// the TFLite model, labels.txt and training_manifest.json.
    Train(TrainArgs),

    /// Assemble the corpus and download datasets without training
    Prepare(PrepareArgs),

    /// Check that a model file loads and print its input/output tensors
    Inspect(InspectArgs),

    /// Download a prebuilt NSFW model from the known mirrors
    Fetch(FetchArgs),

    /// List labels and the datasets that populate them
    Sources(SourcesArgs),

    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber =
        FmtSubscriber::builder().with_max_level(level).without_time().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ctx = config::CliContext::resolve(args.root, args.config)?;

    match args.command {
        Command::Train(cmd) => train::execute(&ctx, cmd).await?,
        Command::Prepare(cmd) => prepare::execute(&ctx, cmd).await?,
        Command::Inspect(cmd) => inspect::execute(&ctx, cmd)?,
        Command::Fetch(cmd) => fetch::execute(&ctx, cmd).await?,
        Command::Sources(cmd) => sources::execute(&ctx, cmd)?,
        Command::Config(cmd) => config_cmd::execute(&ctx, cmd)?,
    }

    Ok(())
}
