//! Prebuilt model download command.

use crate::commands::types::FetchArgs;
use crate::config::CliContext;
use anyhow::{Context, Result};
use colored::Colorize;
use shield_training::fetch::AttemptStatus;
use shield_training::fetch_model;

pub async fn execute(ctx: &CliContext, args: FetchArgs) -> Result<()> {
    let mut config = ctx.config.fetch.clone();
    if let Some(output) = args.output {
        config.target = output;
    }
    if !args.urls.is_empty() {
        config.urls = args.urls;
    }

    let outcome = fetch_model(&config, &ctx.root).await.context("Model download failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        for attempt in &outcome.attempts {
            let status = match &attempt.status {
                AttemptStatus::Accepted { bytes } => format!("saved {bytes} bytes").green(),
                AttemptStatus::TooSmall { bytes } => format!("too small ({bytes} bytes)").yellow(),
                AttemptStatus::HttpStatus { code } => format!("HTTP {code}").yellow(),
                AttemptStatus::Failed { error } => error.as_str().red(),
            };
            println!("  {} {}", attempt.url.dimmed(), status);
        }
    }

    if args.json {
        return Ok(());
    }
    // Exhausting every mirror is reported, not treated as an error.
    match &outcome.written {
        Some(path) => println!("{} {}", "Model saved to".bold().green(), path.display()),
        None => println!(
            "{}",
            format!("All {} download attempts failed. Please verify internet connection.", config.urls.len())
                .bold()
                .red()
        ),
    }
    Ok(())
}
