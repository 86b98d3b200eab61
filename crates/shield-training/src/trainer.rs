use crate::artifacts::TrainingMetrics;
use crate::error::TrainingResult;
use crate::job::TrainingJobSpec;
use crate::progress::ProgressSink;
use crate::registry::Label;
use crate::split::Partition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Loss and accuracy over one partition.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

/// Opaque result of a successful training run.
pub trait TrainedModel: Send + Sync {
    /// Labels in output-index order.
    fn labels(&self) -> &[Label];

    fn metrics(&self) -> &TrainingMetrics;

    /// Serialize into a single-file TFLite flatbuffer.
    fn to_tflite(&self) -> TrainingResult<Vec<u8>>;
}

/// A trainable image classifier backend.
///
/// `train` only ever sees the train and validation partitions; the test
/// partition is reserved for `evaluate`.
#[async_trait]
pub trait Trainer: Send + Sync {
    type Model: TrainedModel;

    fn id(&self) -> &'static str;

    async fn prepare(&self, job: &TrainingJobSpec) -> TrainingResult<()>;

    async fn train(
        &self,
        job: &TrainingJobSpec,
        train: &Partition,
        validation: &Partition,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<Self::Model>;

    async fn evaluate(&self, model: &Self::Model, test: &Partition) -> TrainingResult<EvaluationMetrics>;
}
