use crate::error::{TrainingError, TrainingResult};
use crate::registry::Label;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingJobId(pub String);

impl TrainingJobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TrainingJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrainingJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Backbone the classifier is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseArchitecture {
    MobilenetV2,
}

impl BaseArchitecture {
    /// Square input resolution the architecture is usually trained at.
    #[must_use]
    pub fn default_input_size(self) -> u32 {
        match self {
            Self::MobilenetV2 => 224,
        }
    }
}

impl std::fmt::Display for BaseArchitecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MobilenetV2 => f.write_str("mobilenet_v2"),
        }
    }
}

/// Backend-agnostic model reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    /// Trainer backend identifier (e.g., "burn-mobilenet")
    pub engine: String,
    pub architecture: BaseArchitecture,
    /// Square RGB input resolution in pixels.
    pub input_size: u32,
    /// Channel width multiplier (MobileNet "alpha").
    pub width_multiplier: f64,
    /// Dropout before the classification layer while training.
    pub dropout: f64,
}

impl Default for ModelSpec {
    fn default() -> Self {
        let architecture = BaseArchitecture::MobilenetV2;
        Self {
            engine: "burn-mobilenet".to_string(),
            architecture,
            input_size: architecture.default_input_size(),
            width_multiplier: 1.0,
            dropout: 0.2,
        }
    }
}

impl ModelSpec {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.engine.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("model.engine is required".to_string()));
        }
        if self.input_size < 32 {
            return Err(TrainingError::InvalidSpec(format!(
                "model.input_size must be at least 32, got {}",
                self.input_size
            )));
        }
        if !self.width_multiplier.is_finite() || self.width_multiplier <= 0.0 || self.width_multiplier > 2.0 {
            return Err(TrainingError::InvalidSpec("model.width_multiplier must be in (0, 2]".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TrainingError::InvalidSpec("model.dropout must be in [0, 1)".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingHyperParams {
    pub seed: u64,
    pub epochs: u32,
    pub batch_size: u32,
    /// Adam step size.
    pub learning_rate: f64,
    /// L2 weight decay applied through the optimizer.
    pub l2: f64,
}

impl Default for TrainingHyperParams {
    fn default() -> Self {
        Self { seed: 42, epochs: 20, batch_size: 32, learning_rate: 0.001, l2: 1e-4 }
    }
}

impl TrainingHyperParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidSpec("epochs must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        if !(self.learning_rate.is_finite()) || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if !(self.l2.is_finite()) || self.l2 < 0.0 {
            return Err(TrainingError::InvalidSpec("l2 must be >= 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJobSpec {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub base_model: ModelSpec,
    /// Class labels in output-index order.
    pub labels: Vec<Label>,
    pub hyperparams: TrainingHyperParams,
}

impl TrainingJobSpec {
    #[must_use]
    pub fn new(base_model: ModelSpec, labels: Vec<Label>, hyperparams: TrainingHyperParams) -> Self {
        Self { job_id: TrainingJobId::new(), created_at: Utc::now(), base_model, labels, hyperparams }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        self.base_model.validate()?;
        if self.labels.len() < 2 {
            return Err(TrainingError::InvalidSpec("at least two labels are required".to_string()));
        }
        self.hyperparams.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<Label> {
        vec![Label::new("A").unwrap(), Label::new("B").unwrap()]
    }

    #[test]
    fn test_job_spec_validate_requires_engine() {
        let spec = TrainingJobSpec::new(
            ModelSpec { engine: String::new(), ..ModelSpec::default() },
            labels(),
            TrainingHyperParams::default(),
        );
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_job_spec_requires_two_labels() {
        let spec = TrainingJobSpec::new(
            ModelSpec::default(),
            vec![Label::new("A").unwrap()],
            TrainingHyperParams::default(),
        );
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_default_hyperparams() {
        let params = TrainingHyperParams::default();
        assert_eq!(params.epochs, 20);
        assert_eq!(params.batch_size, 32);
        params.validate().unwrap();
        assert!(TrainingHyperParams { batch_size: 0, ..params }.validate().is_err());
    }

    #[test]
    fn test_architecture_input_size() {
        assert_eq!(BaseArchitecture::MobilenetV2.default_input_size(), 224);
        assert_eq!(BaseArchitecture::MobilenetV2.to_string(), "mobilenet_v2");
        assert_eq!(ModelSpec::default().input_size, 224);
    }

    #[test]
    fn test_model_spec_bounds() {
        ModelSpec::default().validate().unwrap();
        assert!(ModelSpec { input_size: 16, ..ModelSpec::default() }.validate().is_err());
        assert!(ModelSpec { width_multiplier: 0.0, ..ModelSpec::default() }.validate().is_err());
        assert!(ModelSpec { dropout: 1.0, ..ModelSpec::default() }.validate().is_err());
        ModelSpec { input_size: 96, width_multiplier: 0.35, ..ModelSpec::default() }.validate().unwrap();
    }
}
