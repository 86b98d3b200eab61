//! Pipeline configuration file support.
//!
//! Every value has a default that reproduces the fixed behaviour of the
//! training script, so an absent or partial `shield.toml` is fine.

use crate::error::{TrainingError, TrainingResult};
use crate::fetch::FetchConfig;
use crate::job::{ModelSpec, TrainingHyperParams};
use crate::registry::SourceRegistry;
use crate::split::SplitConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the pipeline root.
pub const CONFIG_FILE_NAME: &str = "shield.toml";

/// Locations of the pipeline's on-disk state, relative to the pipeline root
/// unless absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub corpus_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub model_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from("data"),
            staging_dir: PathBuf::from("temp_download"),
            model_file: PathBuf::from("haram_detector.tflite"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Fail before training when a label ends up with no images.
    pub require_all_labels: bool,
    pub paths: PathsConfig,
    pub model: ModelSpec,
    pub training: TrainingHyperParams,
    pub split: SplitConfig,
    pub registry: SourceRegistry,
    pub fetch: FetchConfig,
}

impl ShieldConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrainingError::InvalidSpec(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            TrainingError::InvalidSpec(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `<root>/shield.toml` if present, otherwise defaults.
    pub fn discover(root: &Path) -> TrainingResult<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        self.registry.validate()?;
        self.model.validate()?;
        self.training.validate()?;
        self.split.validate()?;
        if self.paths.model_file.file_name().is_none() {
            return Err(TrainingError::InvalidSpec("paths.model_file must name a file".to_string()));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> TrainingResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TrainingError::InvalidSpec(format!("failed to serialize config: {e}")))
    }
}
