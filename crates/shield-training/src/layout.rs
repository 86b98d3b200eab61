use crate::config::PathsConfig;
use crate::registry::Label;
use std::path::{Path, PathBuf};

/// Filesystem layout of one pipeline instance.
///
/// All paths hang off an explicit root so that several pipelines (or tests)
/// can coexist without touching the process working directory.
#[derive(Debug, Clone)]
pub struct TrainingLayout {
    root: PathBuf,
    corpus_dir: PathBuf,
    staging_dir: PathBuf,
    model_path: PathBuf,
}

impl TrainingLayout {
    #[must_use]
    pub fn new(root: &Path, paths: &PathsConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            corpus_dir: root.join(&paths.corpus_dir),
            staging_dir: root.join(&paths.staging_dir),
            model_path: root.join(&paths.model_file),
        }
    }

    /// Layout with the default `data/`, `temp_download/` and `haram_detector.tflite`.
    #[must_use]
    pub fn for_root(root: &Path) -> Self {
        Self::new(root, &PathsConfig::default())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn corpus_dir(&self) -> &Path {
        &self.corpus_dir
    }

    #[must_use]
    pub fn label_dir(&self, label: &Label) -> PathBuf {
        self.corpus_dir.join(label.as_str())
    }

    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    #[must_use]
    pub fn labels_path(&self) -> PathBuf {
        self.sibling_of_model("labels.txt")
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.sibling_of_model("training_manifest.json")
    }

    fn sibling_of_model(&self, name: &str) -> PathBuf {
        self.model_path.parent().map_or_else(|| self.root.join(name), |dir| dir.join(name))
    }
}
