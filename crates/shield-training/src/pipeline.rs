//! End-to-end training run: assemble, acquire, split, train, evaluate,
//! export.

use crate::acquisition::{AcquisitionReport, acquire_all};
use crate::artifacts::{
    ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics, make_artifact, write_manifest,
};
use crate::config::ShieldConfig;
use crate::dataset::{Corpus, check_label_coverage, compute_dataset_id, prepare_corpus, scan_corpus};
use crate::error::{TrainingError, TrainingResult};
use crate::export::export_model;
use crate::job::{TrainingJobId, TrainingJobSpec};
use crate::layout::TrainingLayout;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::provider::DatasetProvider;
use crate::registry::Label;
use crate::split::{SplitSizes, split_corpus};
use crate::trainer::{EvaluationMetrics, TrainedModel, Trainer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

/// Corpus state after assembly and acquisition.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub acquisition: AcquisitionReport,
    pub corpus: Corpus,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub job_id: TrainingJobId,
    /// `None` when training ran on an existing corpus.
    pub acquisition: Option<AcquisitionReport>,
    pub label_counts: BTreeMap<Label, usize>,
    pub split: SplitSizes,
    pub metrics: TrainingMetrics,
    pub test: EvaluationMetrics,
    pub artifacts: Vec<TrainingArtifact>,
}

pub struct Pipeline<T: Trainer> {
    config: ShieldConfig,
    layout: TrainingLayout,
    provider: Option<Box<dyn DatasetProvider>>,
    trainer: T,
}

impl<T: Trainer> Pipeline<T> {
    pub fn new(
        config: ShieldConfig,
        layout: TrainingLayout,
        provider: Box<dyn DatasetProvider>,
        trainer: T,
    ) -> TrainingResult<Self> {
        let mut pipeline = Self::offline(config, layout, trainer)?;
        pipeline.provider = Some(provider);
        Ok(pipeline)
    }

    /// A pipeline that can only train on an already assembled corpus.
    pub fn offline(config: ShieldConfig, layout: TrainingLayout, trainer: T) -> TrainingResult<Self> {
        config.validate()?;
        if config.model.engine != trainer.id() {
            return Err(TrainingError::InvalidSpec(format!(
                "model.engine is {:?} but the trainer is {:?}",
                config.model.engine,
                trainer.id()
            )));
        }
        Ok(Self { config, layout, provider: None, trainer })
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    pub fn layout(&self) -> &TrainingLayout {
        &self.layout
    }

    /// Wipe the corpus, pull every source, and scan what arrived.
    pub async fn prepare_data(&self) -> TrainingResult<PreparedData> {
        let provider = self.provider.as_deref().ok_or_else(|| {
            TrainingError::InvalidSpec("no dataset provider configured for this pipeline".to_string())
        })?;
        let registry = &self.config.registry;
        prepare_corpus(&self.layout, registry)?;
        let acquisition = acquire_all(provider, registry, &self.layout).await?;
        let corpus = self.scan()?;
        for (label, count) in corpus.label_counts() {
            info!("{label}: {count} images");
        }
        Ok(PreparedData { acquisition, corpus })
    }

    /// Scan the corpus directory as it currently stands.
    pub fn scan(&self) -> TrainingResult<Corpus> {
        scan_corpus(self.layout.corpus_dir(), &self.config.registry.class_order())
    }

    /// Full run: prepare data, then train on it.
    pub async fn run(&self, progress: &dyn ProgressSink) -> TrainingResult<PipelineReport> {
        let prepared = self.prepare_data().await?;
        let mut report = self.train_corpus(&prepared.corpus, progress).await?;
        report.acquisition = Some(prepared.acquisition);
        Ok(report)
    }

    /// Split, train, evaluate and export from an already assembled corpus.
    pub async fn train_corpus(&self, corpus: &Corpus, progress: &dyn ProgressSink) -> TrainingResult<PipelineReport> {
        check_label_coverage(corpus, self.config.require_all_labels)?;
        if corpus.is_empty() {
            return Err(TrainingError::Dataset(format!(
                "no images found under {}",
                self.layout.corpus_dir().display()
            )));
        }

        let splits = split_corpus(corpus, &self.config.split)?;
        let sizes = splits.sizes();
        info!("split: {} train, {} validation, {} test", sizes.train, sizes.validation, sizes.test);

        let job = TrainingJobSpec::new(
            self.config.model.clone(),
            corpus.labels().to_vec(),
            self.config.training.clone(),
        );
        self.trainer.prepare(&job).await?;
        let model = self.trainer.train(&job, &splits.train, &splits.validation, progress).await?;
        let test = self.trainer.evaluate(&model, &splits.test).await?;
        info!("Accuracy: {:.2}", test.accuracy);
        progress.on_event(ProgressEvent::Evaluated {
            job_id: job.job_id.clone(),
            accuracy: test.accuracy,
            samples: test.samples,
        });

        let mut artifacts = export_model(&model, &self.layout)?;
        let manifest = TrainingManifest {
            job_id: job.job_id.clone(),
            created_at: job.created_at,
            base_model: job.base_model.clone(),
            hyperparams: job.hyperparams.clone(),
            labels: job.labels.clone(),
            dataset_id: compute_dataset_id(corpus, self.layout.corpus_dir())?,
            label_counts: corpus.label_counts(),
            split: sizes,
            metrics: model.metrics().clone(),
            test,
            artifacts: artifacts.clone(),
        };
        let manifest_path: PathBuf = self.layout.manifest_path();
        write_manifest(&manifest_path, &manifest)?;
        artifacts.push(make_artifact(ArtifactKind::Manifest, manifest_path)?);

        Ok(PipelineReport {
            job_id: job.job_id,
            acquisition: None,
            label_counts: manifest.label_counts,
            split: sizes,
            metrics: manifest.metrics,
            test,
            artifacts,
        })
    }
}
