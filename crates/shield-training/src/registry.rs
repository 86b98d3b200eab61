//! Source registry: which remote datasets feed which label.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A classification category. Doubles as the corpus directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> TrainingResult<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(TrainingError::InvalidSpec("label must not be empty".to_string()));
        }
        if trimmed != name {
            return Err(TrainingError::InvalidSpec(format!(
                "label '{name}' has leading or trailing whitespace"
            )));
        }
        if name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(TrainingError::InvalidSpec(format!(
                "label '{name}' is not usable as a directory name"
            )));
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for Label {
    type Error = TrainingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0
    }
}

/// A (label, remote dataset identifier) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSource {
    pub label: Label,
    /// Provider-resolved identifier, e.g. `owner/dataset` for Kaggle.
    pub dataset: String,
}

impl DatasetSource {
    pub fn new(label: &str, dataset: &str) -> TrainingResult<Self> {
        Ok(Self { label: Label::new(label)?, dataset: dataset.to_string() })
    }

    /// Filesystem-safe prefix derived from the dataset identifier.
    #[must_use]
    pub fn slug(&self) -> String {
        let slug: String = self
            .dataset
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        slug.trim_matches('-').to_string()
    }
}

pub const KAGGLE_NSFW: &str = "dmitryyemelyanov/nsfw-dataset";
pub const KAGGLE_ALCOHOL: &str = "dataclusterlabs/alcohol-bottle-images-glass-bottles";
pub const KAGGLE_PORK: &str = "namhoangtrinh/fresh-spoiled-meat";
pub const KAGGLE_SAFE: &str = "dansbecker/food-101";

/// Static label set plus the sources that populate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub labels: Vec<Label>,
    pub sources: Vec<DatasetSource>,
}

impl SourceRegistry {
    pub fn new(labels: Vec<Label>, sources: Vec<DatasetSource>) -> TrainingResult<Self> {
        let registry = Self { labels, sources };
        registry.validate()?;
        Ok(registry)
    }

    /// The NSFW / ALCOHOL / PORK / SAFE registry backed by Kaggle datasets.
    #[must_use]
    pub fn haram_default() -> Self {
        let label = |name: &str| Label(name.to_string());
        let source = |name: &str, dataset: &str| DatasetSource { label: label(name), dataset: dataset.to_string() };
        Self {
            labels: vec![label("NSFW"), label("ALCOHOL"), label("PORK"), label("SAFE")],
            sources: vec![
                source("ALCOHOL", KAGGLE_ALCOHOL),
                source("PORK", KAGGLE_PORK),
                source("NSFW", KAGGLE_NSFW),
                source("SAFE", KAGGLE_SAFE),
            ],
        }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.labels.is_empty() {
            return Err(TrainingError::InvalidSpec("registry must declare at least one label".to_string()));
        }
        let mut seen = HashSet::new();
        for label in &self.labels {
            if !seen.insert(label.as_str().to_ascii_lowercase()) {
                return Err(TrainingError::InvalidSpec(format!("duplicate label: {label}")));
            }
        }
        for (idx, source) in self.sources.iter().enumerate() {
            if !self.labels.contains(&source.label) {
                return Err(TrainingError::InvalidSpec(format!(
                    "sources[{idx}] refers to undeclared label {}",
                    source.label
                )));
            }
            if source.dataset.trim().is_empty() {
                return Err(TrainingError::InvalidSpec(format!("sources[{idx}] dataset is empty")));
            }
        }
        Ok(())
    }

    /// Labels in class-index order (alphabetical, as a folder loader discovers them).
    #[must_use]
    pub fn class_order(&self) -> Vec<Label> {
        let mut labels = self.labels.clone();
        labels.sort();
        labels
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::haram_default()
    }
}
