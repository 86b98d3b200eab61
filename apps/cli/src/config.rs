//! Pipeline root and configuration resolution.

use anyhow::{Context, Result};
use shield_training::{KaggleCredentials, ShieldConfig, TrainingLayout};
use std::path::PathBuf;

/// Everything a command needs to locate pipeline state.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub root: PathBuf,
    pub config: ShieldConfig,
}

impl CliContext {
    /// Configuration precedence:
    /// 1. `--config <file>`
    /// 2. `<root>/shield.toml`
    /// 3. Defaults
    pub fn resolve(root: Option<PathBuf>, config: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => std::env::current_dir().context("Failed to determine the current directory")?,
        };
        let config = match config {
            Some(path) => ShieldConfig::load_from_file(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => ShieldConfig::discover(&root)
                .with_context(|| format!("Failed to load configuration under {}", root.display()))?,
        };
        Ok(Self { root, config })
    }

    pub fn layout(&self) -> TrainingLayout {
        TrainingLayout::new(&self.root, &self.config.paths)
    }
}

/// Kaggle credentials from the environment or `~/.kaggle/kaggle.json`.
pub fn kaggle_credentials() -> Result<KaggleCredentials> {
    KaggleCredentials::discover(dirs::home_dir().as_deref())
        .context("Kaggle credentials are required to download datasets")
}
