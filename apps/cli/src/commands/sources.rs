//! Registry listing command.

use crate::commands::types::SourcesArgs;
use crate::config::CliContext;
use anyhow::Result;
use colored::Colorize;

pub fn execute(ctx: &CliContext, args: SourcesArgs) -> Result<()> {
    let registry = &ctx.config.registry;

    if args.json {
        println!("{}", serde_json::to_string_pretty(registry)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Labels ({})", registry.labels.len()).bold().cyan());
    for (index, label) in registry.class_order().iter().enumerate() {
        println!("  {index}: {label}");
    }
    println!();
    println!("{}", "Sources (processing order)".bold().cyan());
    for source in &registry.sources {
        println!("  {:<10} {}", source.label.as_str(), source.dataset.dimmed());
    }
    println!();
    Ok(())
}
