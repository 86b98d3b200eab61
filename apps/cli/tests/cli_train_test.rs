//! Integration tests for `shield train`, `shield prepare` and `shield inspect`.

use assert_cmd::Command;
use image::{Rgb, RgbImage};
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn shield(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("shield").unwrap();
    cmd.env("NO_COLOR", "1").arg("--root").arg(root);
    cmd
}

fn populate(root: &Path, label: &str, color: [u8; 3], count: usize) {
    let dir = root.join("data").join(label);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        let shade = (i * 3) as u8;
        let px = Rgb([color[0].saturating_add(shade), color[1], color[2].saturating_add(shade)]);
        RgbImage::from_pixel(12, 12, px).save(dir.join(format!("img{i}.png"))).unwrap();
    }
}

/// A narrow, low-resolution network keeps CPU training fast.
fn small_model(root: &Path) {
    std::fs::write(
        root.join("shield.toml"),
        "[model]\ninput_size = 32\nwidth_multiplier = 0.35\n\n[training]\nlearning_rate = 0.003\nbatch_size = 4\n",
    )
    .unwrap();
}

#[test]
fn test_train_on_existing_corpus_exports_model() {
    let temp = TempDir::new().unwrap();
    small_model(temp.path());
    populate(temp.path(), "NSFW", [220, 120, 100], 10);
    populate(temp.path(), "SAFE", [20, 160, 40], 10);

    shield(temp.path())
        .args(["train", "--skip-download", "--epochs", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Training complete"))
        .stdout(predicate::str::contains("Accuracy:"))
        .stdout(predicate::str::contains("16 train / 2 validation / 2 test"));

    assert!(temp.path().join("haram_detector.tflite").is_file());
    assert!(temp.path().join("training_manifest.json").is_file());
    assert_eq!(
        std::fs::read_to_string(temp.path().join("labels.txt")).unwrap(),
        "ALCOHOL\nNSFW\nPORK\nSAFE\n"
    );

    shield(temp.path())
        .arg("inspect")
        .arg(temp.path().join("haram_detector.tflite"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Valid TFLite Model found at"))
        .stdout(predicate::str::contains("Input Shape: [1 32 32 3]"))
        .stdout(predicate::str::contains("Output Shape: [1 4]"))
        .stdout(predicate::str::contains("Input Type: float32"))
        .stdout(predicate::str::contains("Labels: ALCOHOL, NSFW, PORK, SAFE"));
}

#[test]
fn test_train_json_report() {
    let temp = TempDir::new().unwrap();
    small_model(temp.path());
    populate(temp.path(), "ALCOHOL", [200, 150, 20], 10);
    populate(temp.path(), "PORK", [240, 180, 190], 10);

    let output = shield(temp.path())
        .args(["--log-level", "error", "train", "--skip-download", "--epochs", "2", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["label_counts"]["ALCOHOL"], 10);
    assert_eq!(report["label_counts"]["NSFW"], 0);
    assert_eq!(report["split"]["test"], 2);
    assert!(report["acquisition"].is_null());
}

#[test]
fn test_train_require_all_labels_fails_on_empty_label() {
    let temp = TempDir::new().unwrap();
    populate(temp.path(), "NSFW", [220, 120, 100], 10);
    populate(temp.path(), "SAFE", [20, 160, 40], 10);

    shield(temp.path())
        .args(["train", "--skip-download", "--require-all-labels"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ALCOHOL"));
    assert!(!temp.path().join("haram_detector.tflite").exists());
}

#[test]
fn test_train_empty_corpus_fails() {
    let temp = TempDir::new().unwrap();

    shield(temp.path())
        .args(["train", "--skip-download"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no images found"));
}

#[test]
fn test_prepare_without_credentials_fails() {
    let temp = TempDir::new().unwrap();

    shield(temp.path())
        .env_remove("KAGGLE_USERNAME")
        .env_remove("KAGGLE_KEY")
        .env_remove("KAGGLE_CONFIG_DIR")
        .env("HOME", temp.path())
        .arg("prepare")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Kaggle credentials"));
}

#[test]
fn test_inspect_reports_invalid_file_without_failing() {
    let temp = TempDir::new().unwrap();
    let bogus = temp.path().join("model.tflite");
    std::fs::write(&bogus, "<html>404</html>").unwrap();

    shield(temp.path())
        .arg("inspect")
        .arg(&bogus)
        .assert()
        .success()
        .stdout(predicate::str::contains("Model invalid or corrupt"));
}
