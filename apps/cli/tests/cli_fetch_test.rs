//! Integration tests for `shield fetch`.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_fetch_skips_small_and_failed_candidates() {
    let mut server = mockito::Server::new();
    let _missing = server.mock("GET", "/missing.tflite").with_status(404).create();
    let _page = server.mock("GET", "/page.tflite").with_status(200).with_body("<html>moved</html>").create();
    let _model = server.mock("GET", "/model.tflite").with_status(200).with_body(vec![3u8; 150_000]).create();

    let temp = TempDir::new().unwrap();
    Command::cargo_bin("shield")
        .unwrap()
        .env("NO_COLOR", "1")
        .arg("--root")
        .arg(temp.path())
        .arg("fetch")
        .args(["--url", &format!("{}/missing.tflite", server.url())])
        .args(["--url", &format!("{}/page.tflite", server.url())])
        .args(["--url", &format!("{}/model.tflite", server.url())])
        .assert()
        .success()
        .stdout(predicate::str::contains("HTTP 404"))
        .stdout(predicate::str::contains("too small"))
        .stdout(predicate::str::contains("Model saved to"));

    let saved = std::fs::read(temp.path().join("app/src/main/assets/haram_detector.tflite")).unwrap();
    assert_eq!(saved.len(), 150_000);

    // A blob of the right size is still not a model.
    Command::cargo_bin("shield")
        .unwrap()
        .arg("--root")
        .arg(temp.path())
        .arg("inspect")
        .assert()
        .success()
        .stdout(predicate::str::contains("Model invalid or corrupt"));
}

#[test]
fn test_fetch_reports_when_no_candidate_succeeds() {
    let mut server = mockito::Server::new();
    let _missing = server.mock("GET", "/missing.tflite").with_status(404).create();

    let temp = TempDir::new().unwrap();
    let output = temp.path().join("model.tflite");
    Command::cargo_bin("shield")
        .unwrap()
        .arg("--root")
        .arg(temp.path())
        .arg("fetch")
        .arg("--output")
        .arg(&output)
        .args(["--url", &format!("{}/missing.tflite", server.url())])
        .assert()
        .success()
        .stdout(predicate::str::contains("HTTP 404"))
        .stdout(predicate::str::contains("All 1 download attempts failed"));
    assert!(!output.exists());
}
