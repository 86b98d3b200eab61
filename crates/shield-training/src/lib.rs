//! Shield Training
//!
//! Builds an on-device image classifier for content screening:
//! - Pulling labelled image datasets into a per-label corpus
//! - Splitting the corpus into train / validation / test partitions
//! - Training a MobileNet-V2 classifier (burn) behind the `Trainer` seam
//! - Exporting a TFLite model plus a labels sidecar and manifest
//! - Verifying model files and fetching prebuilt ones

pub mod acquisition;
pub mod archive;
pub mod artifacts;
pub mod burn_trainer;
pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod fetch;
pub mod inspect;
pub mod job;
pub mod layout;
pub mod mobilenet;
pub mod pipeline;
pub mod preprocess;
pub mod progress;
pub mod provider;
pub mod registry;
pub mod split;
pub mod tflite;
pub mod trainer;

pub use acquisition::{AcquisitionReport, SourceOutcome, SourceStatus, acquire_all};
pub use artifacts::{ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics};
pub use burn_trainer::{MobileNetModel, MobileNetTrainer};
pub use config::{CONFIG_FILE_NAME, PathsConfig, ShieldConfig};
pub use dataset::{Corpus, DatasetId, ImageSample, check_label_coverage, prepare_corpus, scan_corpus};
pub use error::{TrainingError, TrainingResult};
pub use export::export_model;
pub use fetch::{FetchConfig, FetchOutcome, fetch_model};
pub use inspect::{ModelInspection, TensorSummary, inspect_model};
pub use job::{BaseArchitecture, ModelSpec, TrainingHyperParams, TrainingJobId, TrainingJobSpec};
pub use layout::TrainingLayout;
pub use pipeline::{Pipeline, PipelineReport, PreparedData};
pub use progress::{NullProgressSink, ProgressEvent, ProgressSink, RecordingProgressSink, StdoutProgressSink};
pub use provider::{DatasetProvider, KaggleCredentials, KaggleProvider};
pub use registry::{DatasetSource, Label, SourceRegistry};
pub use split::{DatasetSplits, Partition, PartitionRole, SplitConfig, SplitSizes, split_corpus};
pub use trainer::{EvaluationMetrics, TrainedModel, Trainer};
