//! Training command implementation.

use crate::commands::types::TrainArgs;
use crate::config::{CliContext, kaggle_credentials};
use anyhow::{Context, Result};
use colored::Colorize;
use shield_training::{
    ArtifactKind, KaggleProvider, MobileNetTrainer, NullProgressSink, Pipeline, PipelineReport, ProgressSink,
    SourceStatus, StdoutProgressSink,
};

pub async fn execute(ctx: &CliContext, args: TrainArgs) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if args.require_all_labels {
        config.require_all_labels = true;
    }

    let layout = ctx.layout();
    let trainer = MobileNetTrainer::new();
    let progress: &dyn ProgressSink = if args.quiet || args.json { &NullProgressSink } else { &StdoutProgressSink };

    let report = if args.skip_download {
        let pipeline = Pipeline::offline(config, layout, trainer).context("Invalid training configuration")?;
        let corpus = pipeline.scan().context("Failed to scan the corpus directory")?;
        pipeline.train_corpus(&corpus, progress).await.context("Training failed")?
    } else {
        let provider = KaggleProvider::new(kaggle_credentials()?)?;
        let pipeline =
            Pipeline::new(config, layout, Box::new(provider), trainer).context("Invalid training configuration")?;
        pipeline.run(progress).await.context("Training failed")?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &PipelineReport) {
    println!();
    println!("{}", "Training complete".bold().green());
    println!("  Job: {}", report.job_id.to_string().cyan());

    if let Some(acquisition) = &report.acquisition {
        for source in acquisition.failures() {
            if let SourceStatus::Failed { error, .. } = &source.status {
                println!("  {} {} ({}): {}", "!".yellow(), source.label, source.dataset, error.dimmed());
            }
        }
    }

    println!();
    for (label, count) in &report.label_counts {
        let line = format!("  {:<12} {count} images", label.as_str());
        if *count == 0 { println!("{}", line.yellow()) } else { println!("{line}") }
    }
    println!(
        "  Split: {} train / {} validation / {} test",
        report.split.train, report.split.validation, report.split.test
    );
    if let Some(epoch) = report.metrics.best_epoch {
        println!("  Best epoch: {epoch}");
    }
    if report.metrics.skipped_images > 0 {
        println!("  {}", format!("Skipped {} unreadable images", report.metrics.skipped_images).yellow());
    }
    println!("  Accuracy: {:.2}", report.test.accuracy);
    println!();

    for artifact in &report.artifacts {
        let kind = match artifact.kind {
            ArtifactKind::TfliteModel => "model",
            ArtifactKind::Labels => "labels",
            ArtifactKind::Manifest => "manifest",
        };
        println!("  {:<9} {}", kind, artifact.path.display().to_string().dimmed());
    }
    println!();
}
