//! Command argument types.

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Train on the existing corpus instead of wiping and downloading it
    #[arg(long)]
    pub skip_download: bool,

    /// Override the number of training epochs
    #[arg(long)]
    pub epochs: Option<u32>,

    /// Override the mini-batch size
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Fail before training if any label ends up without images
    #[arg(long)]
    pub require_all_labels: bool,

    /// Suppress per-epoch progress lines
    #[arg(short, long)]
    pub quiet: bool,

    /// Output the run report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PrepareArgs {
    /// Output the acquisition report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Model file (defaults to the fetch target under the root)
    pub path: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Destination file (overrides fetch.target)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Candidate URL to try instead of the configured list (repeatable)
    #[arg(long = "url")]
    pub urls: Vec<String>,

    /// Output the attempt log as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SourcesArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Write the configuration to <root>/shield.toml
    #[arg(long)]
    pub write: bool,

    /// Overwrite an existing shield.toml
    #[arg(long, requires = "write")]
    pub force: bool,
}
