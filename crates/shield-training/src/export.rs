use crate::artifacts::{ArtifactKind, TrainingArtifact, make_artifact};
use crate::error::{TrainingError, TrainingResult};
use crate::layout::TrainingLayout;
use crate::trainer::TrainedModel;
use tracing::info;

/// Write the model file and its `labels.txt` sidecar.
///
/// The model path is overwritten in place; a failure part-way through can
/// leave a truncated file behind.
pub fn export_model<M: TrainedModel + ?Sized>(
    model: &M,
    layout: &TrainingLayout,
) -> TrainingResult<Vec<TrainingArtifact>> {
    let bytes = model.to_tflite()?;
    let model_path = layout.model_path().to_path_buf();
    if let Some(parent) = model_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&model_path, &bytes)
        .map_err(|e| TrainingError::Export(format!("failed to write {}: {e}", model_path.display())))?;
    info!("wrote {} ({} bytes)", model_path.display(), bytes.len());

    let labels_path = layout.labels_path();
    let mut labels = String::new();
    for label in model.labels() {
        labels.push_str(label.as_str());
        labels.push('\n');
    }
    std::fs::write(&labels_path, labels)
        .map_err(|e| TrainingError::Export(format!("failed to write {}: {e}", labels_path.display())))?;

    Ok(vec![
        make_artifact(ArtifactKind::TfliteModel, model_path)?,
        make_artifact(ArtifactKind::Labels, labels_path)?,
    ])
}
