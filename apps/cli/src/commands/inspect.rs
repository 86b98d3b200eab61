//! Model verification command.

use crate::commands::types::InspectArgs;
use crate::config::CliContext;
use anyhow::Result;
use colored::Colorize;
use shield_training::inspect::format_shape;
use shield_training::{ModelInspection, inspect_model};

pub fn execute(ctx: &CliContext, args: InspectArgs) -> Result<()> {
    let path = args.path.unwrap_or_else(|| ctx.root.join(&ctx.config.fetch.target));
    let inspection = inspect_model(&path);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    match inspection {
        ModelInspection::Valid { path, input, output, labels, .. } => {
            println!("{} Valid TFLite Model found at {}", "✅".green(), path.display());
            println!("Input Shape: {}", format_shape(&input.shape));
            println!("Output Shape: {}", format_shape(&output.shape));
            println!("Input Type: {}", input.dtype);
            println!("Output Type: {}", output.dtype);
            if let Some(labels) = labels {
                println!("Labels: {}", labels.join(", "));
            }
        }
        ModelInspection::Invalid { error, .. } => {
            println!("{} Model invalid or corrupt: {}", "❌".red(), error);
        }
    }
    Ok(())
}
