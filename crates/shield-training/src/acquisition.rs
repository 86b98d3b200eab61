//! Pull every registered source into the corpus.
//!
//! Sources are processed sequentially in registry order. Any failure for a
//! source, including resetting the staging directory, is logged and
//! recorded, then the next source runs.

use crate::archive;
use crate::dataset::is_image_file;
use crate::error::{TrainingError, TrainingResult};
use crate::layout::TrainingLayout;
use crate::provider::DatasetProvider;
use crate::registry::{DatasetSource, Label, SourceRegistry};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Acquired { images: usize },
    /// `images` counts files that reached the corpus before the failure.
    Failed { error: String, images: usize },
}

impl SourceStatus {
    #[must_use]
    pub fn images(&self) -> usize {
        match self {
            Self::Acquired { images } | Self::Failed { images, .. } => *images,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub label: Label,
    pub dataset: String,
    #[serde(flatten)]
    pub status: SourceStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquisitionReport {
    pub sources: Vec<SourceOutcome>,
}

impl AcquisitionReport {
    /// Images moved into `label` across all of its sources, failed ones
    /// included.
    #[must_use]
    pub fn images_for(&self, label: &Label) -> usize {
        self.sources.iter().filter(|s| &s.label == label).map(|s| s.status.images()).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|s| matches!(s.status, SourceStatus::Failed { .. }))
    }
}

/// Name an acquired file so that identical names from different sources or
/// subdirectories never collide: `<slug>-<hash>-<name>`, where the hash
/// covers the full dataset id and the path inside the archive.
#[must_use]
pub fn qualified_file_name(source: &DatasetSource, relative: &Path, file_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.dataset.as_bytes());
    hasher.update([0u8]);
    hasher.update(relative.to_string_lossy().as_bytes());
    format!("{}-{}-{file_name}", source.slug(), &hex::encode(hasher.finalize())[..8])
}

/// Run every source in `registry` through `provider`.
pub async fn acquire_all(
    provider: &dyn DatasetProvider,
    registry: &SourceRegistry,
    layout: &TrainingLayout,
) -> TrainingResult<AcquisitionReport> {
    let mut report = AcquisitionReport::default();

    for source in &registry.sources {
        let status = acquire_source(provider, source, layout).await;
        match &status {
            SourceStatus::Acquired { images } => info!("{}: {images} images from {}", source.label, source.dataset),
            SourceStatus::Failed { error, images } => {
                warn!("Error downloading {}: {error} ({images} images kept)", source.label);
            }
        }
        report.sources.push(SourceOutcome { label: source.label.clone(), dataset: source.dataset.clone(), status });
    }

    Ok(report)
}

/// Download, extract and flatten one source into its label directory.
///
/// Staging is reset before and removed after the source, whatever the
/// outcome.
pub async fn acquire_source(
    provider: &dyn DatasetProvider,
    source: &DatasetSource,
    layout: &TrainingLayout,
) -> SourceStatus {
    let mut moved = 0;
    let result = match reset_staging(layout.staging_dir()) {
        Ok(()) => download_and_flatten(provider, source, layout, &mut moved).await,
        Err(e) => Err(TrainingError::Acquisition(format!(
            "failed to reset staging directory {}: {e}",
            layout.staging_dir().display()
        ))),
    };
    if let Err(e) = remove_staging(layout.staging_dir()) {
        warn!("failed to remove staging directory {}: {e}", layout.staging_dir().display());
    }

    match result {
        Ok(()) => SourceStatus::Acquired { images: moved },
        Err(e) => SourceStatus::Failed { error: e.to_string(), images: moved },
    }
}

async fn download_and_flatten(
    provider: &dyn DatasetProvider,
    source: &DatasetSource,
    layout: &TrainingLayout,
    moved: &mut usize,
) -> TrainingResult<()> {
    let staging = layout.staging_dir();
    let download = provider.download(&source.dataset, staging).await?;
    let extracted = staging.join("extracted");
    archive::extract(&download, &extracted)?;

    let target = layout.label_dir(&source.label);
    std::fs::create_dir_all(&target)?;

    for entry in WalkDir::new(&extracted).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| TrainingError::Acquisition(e.to_string()))?;
        if !entry.file_type().is_file() || !is_image_file(entry.path()) {
            continue;
        }
        let relative = entry.path().strip_prefix(&extracted).unwrap_or(entry.path());
        let file_name = entry.file_name().to_string_lossy();
        let dest = target.join(qualified_file_name(source, relative, &file_name));
        move_file(entry.path(), &dest).map_err(|e| {
            TrainingError::Acquisition(format!("failed to move {} to {}: {e}", relative.display(), dest.display()))
        })?;
        *moved += 1;
    }

    Ok(())
}

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)
}

fn reset_staging(staging: &Path) -> std::io::Result<()> {
    remove_staging(staging)?;
    std::fs::create_dir_all(staging)
}

fn remove_staging(staging: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(staging) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::prepare_corpus;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    /// Serves canned zip archives keyed by dataset id.
    struct FakeProvider {
        archives: HashMap<String, Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl DatasetProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn download(&self, dataset: &str, staging_dir: &Path) -> TrainingResult<PathBuf> {
            let files = self
                .archives
                .get(dataset)
                .ok_or_else(|| TrainingError::Acquisition(format!("404 for {dataset}")))?;
            let path = staging_dir.join("archive.zip");
            let mut zip = zip::ZipWriter::new(std::fs::File::create(&path)?);
            for (name, data) in files {
                zip.start_file(name.as_str(), SimpleFileOptions::default())?;
                zip.write_all(data)?;
            }
            zip.finish()?;
            Ok(path)
        }
    }

    fn registry() -> SourceRegistry {
        SourceRegistry::new(
            vec![Label::new("A").unwrap(), Label::new("B").unwrap()],
            vec![
                DatasetSource::new("A", "one/first").unwrap(),
                DatasetSource::new("B", "two/missing").unwrap(),
                DatasetSource::new("A", "three/second").unwrap(),
            ],
        )
        .unwrap()
    }

    fn provider() -> FakeProvider {
        let file = |name: &str| (name.to_string(), b"img".to_vec());
        let mut archives = HashMap::new();
        archives.insert(
            "one/first".to_string(),
            vec![file("x/cat.jpg"), file("y/cat.jpg"), file("readme.txt"), file("z/photo.PNG")],
        );
        archives.insert("three/second".to_string(), vec![file("cat.jpg")]);
        FakeProvider { archives }
    }

    #[tokio::test]
    async fn test_failed_source_does_not_stop_the_rest() {
        let temp = TempDir::new().unwrap();
        let layout = TrainingLayout::for_root(temp.path());
        let registry = registry();
        prepare_corpus(&layout, &registry).unwrap();

        let report = acquire_all(&provider(), &registry, &layout).await.unwrap();

        assert_eq!(report.sources.len(), 3);
        assert_eq!(report.sources[0].status, SourceStatus::Acquired { images: 3 });
        assert!(matches!(report.sources[1].status, SourceStatus::Failed { .. }));
        assert_eq!(report.sources[2].status, SourceStatus::Acquired { images: 1 });
        assert_eq!(report.images_for(&Label::new("A").unwrap()), 4);
        assert_eq!(report.images_for(&Label::new("B").unwrap()), 0);
        assert_eq!(report.failures().count(), 1);

        let names: Vec<String> = std::fs::read_dir(layout.label_dir(&Label::new("A").unwrap()))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 4);
        assert!(names.iter().all(|n| !n.ends_with(".txt")));
        assert_eq!(names.iter().filter(|n| n.starts_with("one-first-") && n.ends_with("-cat.jpg")).count(), 2);
        assert!(!layout.staging_dir().exists());
    }

    #[tokio::test]
    async fn test_stale_staging_is_cleared() {
        let temp = TempDir::new().unwrap();
        let layout = TrainingLayout::for_root(temp.path());
        let registry = registry();
        prepare_corpus(&layout, &registry).unwrap();
        std::fs::create_dir_all(layout.staging_dir().join("extracted")).unwrap();
        std::fs::write(layout.staging_dir().join("extracted/leftover.jpg"), b"old").unwrap();

        let report = acquire_all(&provider(), &registry, &layout).await.unwrap();
        assert_eq!(report.images_for(&Label::new("A").unwrap()), 4);
    }

    #[tokio::test]
    async fn test_similar_dataset_ids_do_not_overwrite_each_other() {
        let temp = TempDir::new().unwrap();
        let layout = TrainingLayout::for_root(temp.path());
        let registry = SourceRegistry::new(
            vec![Label::new("A").unwrap(), Label::new("B").unwrap()],
            vec![DatasetSource::new("A", "x/b-c").unwrap(), DatasetSource::new("A", "x-b/c").unwrap()],
        )
        .unwrap();
        prepare_corpus(&layout, &registry).unwrap();
        let mut archives = HashMap::new();
        archives.insert("x/b-c".to_string(), vec![("cat.jpg".to_string(), b"one".to_vec())]);
        archives.insert("x-b/c".to_string(), vec![("cat.jpg".to_string(), b"two".to_vec())]);

        let report = acquire_all(&FakeProvider { archives }, &registry, &layout).await.unwrap();

        let label = Label::new("A").unwrap();
        let on_disk = std::fs::read_dir(layout.label_dir(&label)).unwrap().count();
        assert_eq!(report.images_for(&label), 2);
        assert_eq!(on_disk, 2);
    }

    #[tokio::test]
    async fn test_partial_move_keeps_count_of_moved_files() {
        let temp = TempDir::new().unwrap();
        let layout = TrainingLayout::for_root(temp.path());
        let registry = SourceRegistry::new(
            vec![Label::new("A").unwrap(), Label::new("B").unwrap()],
            vec![DatasetSource::new("A", "one/first").unwrap()],
        )
        .unwrap();
        prepare_corpus(&layout, &registry).unwrap();
        let source = &registry.sources[0];

        // A non-empty directory squatting on the second file's destination.
        let blocked = layout.label_dir(&source.label).join(qualified_file_name(source, Path::new("b.jpg"), "b.jpg"));
        std::fs::create_dir_all(blocked.join("inner")).unwrap();

        let mut archives = HashMap::new();
        archives.insert(
            "one/first".to_string(),
            vec![("a.jpg".to_string(), b"a".to_vec()), ("b.jpg".to_string(), b"b".to_vec())],
        );
        let report = acquire_all(&FakeProvider { archives }, &registry, &layout).await.unwrap();

        match &report.sources[0].status {
            SourceStatus::Failed { error, images } => {
                assert_eq!(*images, 1);
                assert!(error.contains("b.jpg"), "{error}");
            }
            other => panic!("expected a failure, got {other:?}"),
        }
        assert_eq!(report.images_for(&source.label), 1);
        assert!(!layout.staging_dir().exists());
    }

    #[tokio::test]
    async fn test_staging_reset_failure_is_recorded_per_source() {
        let temp = TempDir::new().unwrap();
        let layout = TrainingLayout::for_root(temp.path());
        let registry = registry();
        prepare_corpus(&layout, &registry).unwrap();
        // A plain file where the staging directory should go.
        std::fs::create_dir_all(layout.staging_dir().parent().unwrap()).unwrap();
        std::fs::write(layout.staging_dir(), b"not a directory").unwrap();

        let report = acquire_all(&provider(), &registry, &layout).await.unwrap();

        assert_eq!(report.sources.len(), 3);
        assert_eq!(report.failures().count(), 3);
        for source in &report.sources {
            assert!(matches!(&source.status, SourceStatus::Failed { error, images: 0 } if error.contains("staging")));
        }
    }

    #[test]
    fn test_qualified_names_differ_by_relative_path_and_dataset() {
        let source = DatasetSource::new("A", "src").unwrap();
        let a = qualified_file_name(&source, Path::new("x/cat.jpg"), "cat.jpg");
        let b = qualified_file_name(&source, Path::new("y/cat.jpg"), "cat.jpg");
        assert_ne!(a, b);
        assert!(a.starts_with("src-") && a.ends_with("-cat.jpg"));
        assert_eq!(a.len(), "src-".len() + 8 + "-cat.jpg".len());

        let first = DatasetSource::new("A", "x/b-c").unwrap();
        let second = DatasetSource::new("A", "x-b/c").unwrap();
        assert_eq!(first.slug(), second.slug());
        assert_ne!(
            qualified_file_name(&first, Path::new("cat.jpg"), "cat.jpg"),
            qualified_file_name(&second, Path::new("cat.jpg"), "cat.jpg")
        );
    }
}
