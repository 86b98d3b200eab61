//! Offline verification of a model file.
//!
//! Never fails: every problem, including a missing file, is reported as
//! [`ModelInspection::Invalid`].

use crate::tflite::TensorType;
use crate::tflite::reader::{TensorInfo, parse_model};
use crate::tflite::writer::LABELS_METADATA;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSummary {
    pub name: String,
    pub shape: Vec<i32>,
    pub dtype: TensorType,
}

impl From<&TensorInfo> for TensorSummary {
    fn from(t: &TensorInfo) -> Self {
        Self { name: t.name.clone(), shape: t.shape.clone(), dtype: t.dtype }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelInspection {
    Valid {
        path: PathBuf,
        size_bytes: usize,
        version: u32,
        description: Option<String>,
        input: TensorSummary,
        output: TensorSummary,
        /// Class names, when the model carries a labels metadata entry.
        labels: Option<Vec<String>>,
    },
    Invalid {
        path: PathBuf,
        error: String,
    },
}

impl ModelInspection {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

pub fn inspect_model(path: &Path) -> ModelInspection {
    let invalid = |error: String| ModelInspection::Invalid { path: path.to_path_buf(), error };

    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) => return invalid(format!("cannot read {}: {e}", path.display())),
    };
    let info = match parse_model(&data) {
        Ok(info) => info,
        Err(e) => return invalid(e.to_string()),
    };
    if let Err(e) = info.check_allocatable() {
        return invalid(e.to_string());
    }
    let (input, output) = match (info.input(), info.output()) {
        (Ok(i), Ok(o)) => (TensorSummary::from(i), TensorSummary::from(o)),
        (Err(e), _) | (_, Err(e)) => return invalid(e.to_string()),
    };
    let labels = info
        .metadata_bytes(LABELS_METADATA)
        .map(|blob| String::from_utf8_lossy(blob).lines().map(ToString::to_string).collect());

    ModelInspection::Valid {
        path: path.to_path_buf(),
        size_bytes: data.len(),
        version: info.version,
        description: info.description.clone(),
        input,
        output,
        labels,
    }
}

/// Render a shape the way interpreters print it: `[1 224 224 3]`.
#[must_use]
pub fn format_shape(shape: &[i32]) -> String {
    let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
    format!("[{}]", dims.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tflite::writer::{ClassifierGraph, ConvBlock, ConvKind, ConvLayer, write_classifier};
    use tempfile::TempDir;

    fn model_bytes() -> Vec<u8> {
        let pointwise = ConvLayer {
            kind: ConvKind::Standard,
            in_channels: 3,
            out_channels: 4,
            kernel: 1,
            stride: 1,
            padding: 0,
            weights: vec![0.5; 12],
            bias: vec![0.0; 4],
            relu6: true,
        };
        write_classifier(&ClassifierGraph {
            input_size: 224,
            labels: vec!["A".to_string(), "B".to_string()],
            description: "two classes".to_string(),
            blocks: vec![ConvBlock { layers: vec![pointwise], residual: false }],
            dense_weights: vec![0.0; 2 * 4],
            dense_bias: vec![0.0, 0.0],
        })
        .unwrap()
    }

    #[test]
    fn test_valid_model_reports_shapes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("m.tflite");
        std::fs::write(&path, model_bytes()).unwrap();

        match inspect_model(&path) {
            ModelInspection::Valid { input, output, labels, .. } => {
                assert_eq!(format_shape(&input.shape), "[1 224 224 3]");
                assert_eq!(input.dtype, TensorType::Float32);
                assert_eq!(output.shape, vec![1, 2]);
                assert_eq!(labels, Some(vec!["A".to_string(), "B".to_string()]));
            }
            other => panic!("expected a valid model, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_truncated_and_html_files_are_invalid() {
        let temp = TempDir::new().unwrap();
        assert!(!inspect_model(&temp.path().join("absent.tflite")).is_valid());

        let truncated = temp.path().join("truncated.tflite");
        let bytes = model_bytes();
        std::fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();
        assert!(!inspect_model(&truncated).is_valid());

        let html = temp.path().join("page.tflite");
        std::fs::write(&html, "<!DOCTYPE html><html><body>Not Found</body></html>").unwrap();
        match inspect_model(&html) {
            ModelInspection::Invalid { error, .. } => assert!(!error.is_empty()),
            other => panic!("expected invalid, got {other:?}"),
        }
    }
}
