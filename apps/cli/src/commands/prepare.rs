//! Corpus preparation: assemble and acquire without training.

use crate::commands::types::PrepareArgs;
use crate::config::{CliContext, kaggle_credentials};
use anyhow::{Context, Result};
use colored::Colorize;
use shield_training::{KaggleProvider, MobileNetTrainer, Pipeline, SourceStatus};

pub async fn execute(ctx: &CliContext, args: PrepareArgs) -> Result<()> {
    let provider = KaggleProvider::new(kaggle_credentials()?)?;
    let pipeline = Pipeline::new(ctx.config.clone(), ctx.layout(), Box::new(provider), MobileNetTrainer::new())
        .context("Invalid configuration")?;
    let prepared = pipeline.prepare_data().await.context("Failed to prepare the corpus")?;

    if args.json {
        let out = serde_json::json!({
            "sources": prepared.acquisition.sources,
            "label_counts": prepared.corpus.label_counts(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "Corpus prepared".bold().cyan());
    println!("  {}", pipeline.layout().corpus_dir().display().to_string().dimmed());
    println!();
    for source in &prepared.acquisition.sources {
        match &source.status {
            SourceStatus::Acquired { images } => {
                println!("  {} {:<10} {:<55} {images}", "✓".green(), source.label.as_str(), source.dataset);
            }
            SourceStatus::Failed { error, images } => {
                println!(
                    "  {} {:<10} {:<55} {images} {}",
                    "✗".red(),
                    source.label.as_str(),
                    source.dataset,
                    error.dimmed()
                );
            }
        }
    }
    println!();
    for (label, count) in prepared.corpus.label_counts() {
        println!("  {:<10} {count} images", label.as_str());
    }
    println!();
    Ok(())
}
