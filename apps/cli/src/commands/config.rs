//! Configuration display and scaffolding.

use crate::commands::types::ConfigArgs;
use crate::config::CliContext;
use anyhow::{Context, Result, bail};
use colored::Colorize;
use shield_training::CONFIG_FILE_NAME;

pub fn execute(ctx: &CliContext, args: ConfigArgs) -> Result<()> {
    let rendered = ctx.config.to_toml().context("Failed to render configuration")?;

    if !args.write {
        print!("{rendered}");
        return Ok(());
    }

    let path = ctx.root.join(CONFIG_FILE_NAME);
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::create_dir_all(&ctx.root)?;
    std::fs::write(&path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} {}", "Wrote".green(), path.display());
    Ok(())
}
