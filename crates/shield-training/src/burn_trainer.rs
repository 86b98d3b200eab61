//! Burn trainer: MobileNet-V2 fitted from scratch on the CPU.
//!
//! Training runs on `Autodiff<NdArray>` with Adam and cross-entropy loss.
//! After each epoch the network is evaluated on the validation partition
//! and the best epoch's weights are kept on the plain `NdArray` backend for
//! evaluation and export.

use crate::artifacts::TrainingMetrics;
use crate::dataset::ImageSample;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{ModelSpec, TrainingJobSpec};
use crate::mobilenet::{MobileNetV2, MobileNetV2Config};
use crate::preprocess::ImagePreprocessor;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::registry::Label;
use crate::split::Partition;
use crate::tflite::writer::write_classifier;
use crate::trainer::{EvaluationMetrics, TrainedModel, Trainer};
use async_trait::async_trait;
use burn::{
    backend::{Autodiff, NdArray, ndarray::NdArrayDevice},
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer, decay::WeightDecayConfig},
    tensor::{ElementConversion, Int, Tensor, backend::Backend},
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

type InferenceBackend = NdArray<f32>;
type TrainBackend = Autodiff<InferenceBackend>;

pub const ENGINE_ID: &str = "burn-mobilenet";

#[derive(Debug, Clone, Copy, Default)]
pub struct MobileNetTrainer;

impl MobileNetTrainer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Trained network plus what is needed to export it.
pub struct MobileNetModel {
    labels: Vec<Label>,
    spec: ModelSpec,
    network: Mutex<MobileNetV2<InferenceBackend>>,
    metrics: TrainingMetrics,
}

impl std::fmt::Debug for MobileNetModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MobileNetModel")
            .field("labels", &self.labels)
            .field("spec", &self.spec)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl MobileNetModel {
    fn network(&self) -> TrainingResult<std::sync::MutexGuard<'_, MobileNetV2<InferenceBackend>>> {
        self.network.lock().map_err(|_| TrainingError::Trainer("model lock poisoned".to_string()))
    }

    fn preprocessor(&self) -> ImagePreprocessor {
        ImagePreprocessor::new(self.spec.input_size)
    }
}

impl TrainedModel for MobileNetModel {
    fn labels(&self) -> &[Label] {
        &self.labels
    }

    fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    fn to_tflite(&self) -> TrainingResult<Vec<u8>> {
        let labels: Vec<String> = self.labels.iter().map(ToString::to_string).collect();
        let description = format!(
            "shield image classifier ({} x{}, {} labels)",
            self.spec.architecture,
            self.spec.width_multiplier,
            labels.len()
        );
        let graph = self.network()?.to_graph(self.spec.input_size as usize, labels, description)?;
        write_classifier(&graph)
    }
}

/// Keeps samples whose header decodes; returns them with the number dropped.
fn readable<'a>(
    preprocessor: &ImagePreprocessor,
    partition: &'a Partition,
    classes: usize,
) -> TrainingResult<(Vec<&'a ImageSample>, usize)> {
    let mut samples = Vec::with_capacity(partition.len());
    let mut skipped = 0;
    for sample in &partition.samples {
        if sample.class_index >= classes {
            return Err(TrainingError::Dataset(format!(
                "{} has class index {} but the job declares {classes} labels",
                sample.path.display(),
                sample.class_index
            )));
        }
        match preprocessor.check_header(&sample.path) {
            Ok(()) => samples.push(sample),
            Err(e) => {
                warn!("skipping unreadable image {}: {e}", sample.path.display());
                skipped += 1;
            }
        }
    }
    Ok((samples, skipped))
}

struct Batch<B: Backend> {
    images: Tensor<B, 4>,
    targets: Tensor<B, 1, Int>,
    len: usize,
}

/// Decodes one batch; images that fail to decode are left out and
/// remembered so they are only reported once.
fn load_batch<'a, B: Backend>(
    preprocessor: &ImagePreprocessor,
    samples: &[&'a ImageSample],
    undecodable: &mut BTreeSet<&'a Path>,
    device: &B::Device,
) -> Option<Batch<B>> {
    let mut pixels = Vec::with_capacity(samples.len() * preprocessor.values_per_image());
    let mut targets = Vec::with_capacity(samples.len());
    for &sample in samples {
        match preprocessor.load(&sample.path) {
            Ok(values) => {
                pixels.extend_from_slice(&values);
                targets.push(sample.class_index as i64);
            }
            Err(e) => {
                if undecodable.insert(sample.path.as_path()) {
                    warn!("leaving out undecodable image {}: {e}", sample.path.display());
                }
            }
        }
    }
    if targets.is_empty() {
        return None;
    }

    let size = preprocessor.input_size() as usize;
    let len = targets.len();
    Some(Batch {
        images: Tensor::<B, 1>::from_floats(pixels.as_slice(), device).reshape([len, 3, size, size]),
        targets: Tensor::<B, 1, Int>::from_ints(targets.as_slice(), device),
        len,
    })
}

fn evaluate_samples<'a>(
    network: &MobileNetV2<InferenceBackend>,
    preprocessor: &ImagePreprocessor,
    samples: &[&'a ImageSample],
    batch_size: usize,
    undecodable: &mut BTreeSet<&'a Path>,
) -> EvaluationMetrics {
    let device = NdArrayDevice::default();
    let loss_fn = CrossEntropyLossConfig::new().init(&device);
    let (mut loss_sum, mut correct, mut seen) = (0.0, 0i64, 0usize);

    for chunk in samples.chunks(batch_size) {
        let Some(batch) = load_batch::<InferenceBackend>(preprocessor, chunk, undecodable, &device) else {
            continue;
        };
        let logits = network.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        loss_sum += loss.into_scalar().elem::<f64>() * batch.len as f64;
        correct += logits
            .argmax(1)
            .reshape([batch.len])
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();
        seen += batch.len;
    }

    if seen == 0 {
        return EvaluationMetrics::default();
    }
    EvaluationMetrics { loss: loss_sum / seen as f64, accuracy: correct as f64 / seen as f64, samples: seen }
}

fn improves(candidate: &EvaluationMetrics, best: &EvaluationMetrics) -> bool {
    candidate.accuracy > best.accuracy || (candidate.accuracy == best.accuracy && candidate.loss < best.loss)
}

#[async_trait]
impl Trainer for MobileNetTrainer {
    type Model = MobileNetModel;

    fn id(&self) -> &'static str {
        ENGINE_ID
    }

    async fn prepare(&self, job: &TrainingJobSpec) -> TrainingResult<()> {
        job.validate()?;
        let spec = &job.base_model;
        debug!(
            "mobilenet {}: input {}px, width {}, dropout {}",
            spec.architecture, spec.input_size, spec.width_multiplier, spec.dropout
        );
        Ok(())
    }

    async fn train(
        &self,
        job: &TrainingJobSpec,
        train: &Partition,
        validation: &Partition,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<MobileNetModel> {
        job.validate()?;
        let spec = &job.base_model;
        let params = &job.hyperparams;
        let job_id = job.job_id.clone();
        let classes = job.labels.len();
        let preprocessor = ImagePreprocessor::new(spec.input_size);
        let batch_size = params.batch_size as usize;

        progress.on_event(ProgressEvent::Started { job_id: job_id.clone() });
        progress.on_event(ProgressEvent::Message {
            job_id: job_id.clone(),
            message: format!("checking {} train and {} validation images", train.len(), validation.len()),
        });

        let (mut train_set, train_skipped) = readable(&preprocessor, train, classes)?;
        let (val_set, val_skipped) = readable(&preprocessor, validation, classes)?;

        if train_set.is_empty() {
            return Err(TrainingError::Trainer("train partition has no readable images".to_string()));
        }
        let present: BTreeSet<usize> = train_set.iter().map(|s| s.class_index).collect();
        if present.len() < 2 {
            return Err(TrainingError::Trainer(format!(
                "train partition covers {} class(es); at least two are required",
                present.len()
            )));
        }

        let device = NdArrayDevice::default();
        let mut network = MobileNetV2Config::new(classes)
            .with_width_multiplier(spec.width_multiplier)
            .with_dropout(spec.dropout)
            .init::<TrainBackend>(&device);
        let mut optimizer =
            AdamConfig::new().with_weight_decay(Some(WeightDecayConfig::new(params.l2 as f32))).init();
        let loss_fn = CrossEntropyLossConfig::new().init(&device);

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut undecodable = BTreeSet::new();
        let mut best: Option<(EvaluationMetrics, u32, MobileNetV2<InferenceBackend>)> = None;
        let mut train_loss = 0.0;

        for epoch in 1..=params.epochs {
            train_set.shuffle(&mut rng);
            let (mut epoch_loss, mut seen) = (0.0, 0usize);

            for chunk in train_set.chunks(batch_size) {
                let Some(batch) = load_batch::<TrainBackend>(&preprocessor, chunk, &mut undecodable, &device) else {
                    continue;
                };
                let loss = loss_fn.forward(network.forward(batch.images), batch.targets);
                epoch_loss += loss.clone().into_scalar().elem::<f64>() * batch.len as f64;
                seen += batch.len;

                let grads = GradientsParams::from_grads(loss.backward(), &network);
                network = optimizer.step(params.learning_rate, network, grads);
            }

            if seen == 0 {
                return Err(TrainingError::Trainer("no train image could be decoded".to_string()));
            }
            train_loss = epoch_loss / seen as f64;
            if !train_loss.is_finite() {
                return Err(TrainingError::Trainer(format!("training diverged at epoch {epoch}")));
            }

            let snapshot = network.valid();
            let val = (!val_set.is_empty())
                .then(|| evaluate_samples(&snapshot, &preprocessor, &val_set, batch_size, &mut undecodable))
                .filter(|m| m.samples > 0);
            debug!(epoch, train_loss, ?val, "epoch complete");
            progress.on_event(ProgressEvent::Epoch {
                job_id: job_id.clone(),
                epoch,
                total: params.epochs,
                train_loss,
                validation_accuracy: val.map(|m| m.accuracy),
            });

            if let Some(val) = val
                && best.as_ref().is_none_or(|(b, ..)| improves(&val, b))
            {
                best = Some((val, epoch, snapshot));
            }
        }

        let (final_network, validation_metrics, best_epoch) = match best {
            Some((val, epoch, kept)) => (kept, Some(val), Some(epoch)),
            None => {
                warn!("validation partition is empty; keeping final-epoch weights");
                (network.valid(), None, None)
            }
        };

        progress.on_event(ProgressEvent::Finished { job_id });

        Ok(MobileNetModel {
            labels: job.labels.clone(),
            spec: spec.clone(),
            network: Mutex::new(final_network),
            metrics: TrainingMetrics {
                train_loss: Some(train_loss),
                validation_loss: validation_metrics.map(|m| m.loss),
                validation_accuracy: validation_metrics.map(|m| m.accuracy),
                epochs_run: params.epochs,
                best_epoch,
                skipped_images: train_skipped + val_skipped + undecodable.len(),
            },
        })
    }

    async fn evaluate(&self, model: &MobileNetModel, test: &Partition) -> TrainingResult<EvaluationMetrics> {
        if test.is_empty() {
            return Err(TrainingError::Trainer("test partition is empty".to_string()));
        }
        let preprocessor = model.preprocessor();
        let (samples, skipped) = readable(&preprocessor, test, model.labels.len())?;
        let mut undecodable = BTreeSet::new();
        let metrics = {
            let network = model.network()?;
            evaluate_samples(&network, &preprocessor, &samples, 32, &mut undecodable)
        };
        if metrics.samples == 0 {
            return Err(TrainingError::Trainer(format!(
                "none of the {} test images could be read",
                skipped + undecodable.len()
            )));
        }
        info!("test loss {:.4}, accuracy {:.2} over {} images", metrics.loss, metrics.accuracy, metrics.samples);
        Ok(metrics)
    }
}
