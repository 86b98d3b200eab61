//! Corpus layout: one directory per label, images directly inside.

use crate::error::{TrainingError, TrainingResult};
use crate::layout::TrainingLayout;
use crate::registry::{Label, SourceRegistry};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File extensions accepted into the corpus (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Stable identifier for a corpus (content hash of its file listing).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// One image in the corpus together with its class index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSample {
    pub path: PathBuf,
    pub class_index: usize,
}

/// Snapshot of the assembled corpus directory.
#[derive(Debug, Clone)]
pub struct Corpus {
    labels: Vec<Label>,
    samples: Vec<ImageSample>,
}

impl Corpus {
    #[must_use]
    pub fn new(labels: Vec<Label>, samples: Vec<ImageSample>) -> Self {
        Self { labels, samples }
    }

    /// Labels in class-index order.
    #[must_use]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    #[must_use]
    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Image count per label, including labels with zero images.
    #[must_use]
    pub fn label_counts(&self) -> BTreeMap<Label, usize> {
        let mut counts: BTreeMap<Label, usize> = self.labels.iter().map(|l| (l.clone(), 0)).collect();
        for sample in &self.samples {
            if let Some(label) = self.labels.get(sample.class_index) {
                *counts.entry(label.clone()).or_default() += 1;
            }
        }
        counts
    }

    #[must_use]
    pub fn empty_labels(&self) -> Vec<Label> {
        self.label_counts().into_iter().filter(|(_, n)| *n == 0).map(|(l, _)| l).collect()
    }
}

#[must_use]
pub fn is_image_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|a| *a == ext)
}

/// Wipe the corpus root and recreate one empty directory per label.
///
/// Filesystem errors propagate: nothing downstream makes sense without a
/// clean corpus.
pub fn prepare_corpus(layout: &TrainingLayout, registry: &SourceRegistry) -> TrainingResult<()> {
    let root = layout.corpus_dir();
    match std::fs::remove_dir_all(root) {
        Ok(()) => info!("removed previous corpus at {}", root.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    for label in &registry.labels {
        std::fs::create_dir_all(layout.label_dir(label))?;
    }
    Ok(())
}

/// List the image files directly under each label directory.
///
/// `labels` fixes the class-index order. Missing label directories count as
/// empty; nested directories and non-image files are ignored.
pub fn scan_corpus(corpus_dir: &Path, labels: &[Label]) -> TrainingResult<Corpus> {
    let mut samples = Vec::new();

    for (class_index, label) in labels.iter().enumerate() {
        let dir = corpus_dir.join(label.as_str());
        let entries = match std::fs::read_dir(&dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if is_image_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        samples.extend(paths.into_iter().map(|path| ImageSample { path, class_index }));
    }

    Ok(Corpus::new(labels.to_vec(), samples))
}

/// Warn about labels with no images; fail instead when `require_all` is set.
pub fn check_label_coverage(corpus: &Corpus, require_all: bool) -> TrainingResult<()> {
    let empty = corpus.empty_labels();
    if empty.is_empty() {
        return Ok(());
    }

    let names: Vec<&str> = empty.iter().map(Label::as_str).collect();
    if require_all {
        return Err(TrainingError::Dataset(format!(
            "labels without any images: {}",
            names.join(", ")
        )));
    }
    warn!(
        "labels without any images: {} (training continues with reduced class coverage)",
        names.join(", ")
    );
    Ok(())
}

pub fn compute_dataset_id(corpus: &Corpus, corpus_dir: &Path) -> TrainingResult<DatasetId> {
    let mut hasher = Sha256::new();

    for sample in corpus.samples() {
        let rel = sample.path.strip_prefix(corpus_dir).unwrap_or(&sample.path);
        let size = std::fs::metadata(&sample.path)?.len();
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(size.to_le_bytes());
        hasher.update(b"\n");
    }

    Ok(DatasetId(hex::encode(hasher.finalize())))
}
