//! Download a prebuilt NSFW classifier from a list of known mirrors.
//!
//! Candidates are tried in order; the first successful response that is
//! large enough to be a real model is written to the target path. Failures
//! on individual URLs are logged and recorded, never raised.

use crate::error::{TrainingError, TrainingResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Mirrors of the MobileNet-V2 NSFW model, most likely first.
pub const DEFAULT_MODEL_URLS: [&str; 8] = [
    "https://github.com/GantMan/nsfw_model/releases/download/1.1.0/mobilenet_v2_140_224.tflite",
    "https://github.com/GantMan/nsfw_model/releases/download/1.1.0/nsfw_mobilenet_v2_140_224.tflite",
    "https://github.com/GantMan/nsfw_model/releases/download/1.0/mobilenet_v2_140_224.tflite",
    "https://raw.githubusercontent.com/GantMan/nsfw_model/master/models/mobilenet_v2_140_224.tflite",
    "https://raw.githubusercontent.com/GantMan/nsfw_model/main/models/mobilenet_v2_140_224.tflite",
    "https://github.com/MaybeS/nsfw_tflite/raw/master/nsfw.tflite",
    "https://raw.githubusercontent.com/MaybeS/nsfw_tflite/master/nsfw.tflite",
    "https://raw.githubusercontent.com/tensorflow/tfjs-models/master/nsfwjs/mobilenet_v2/model.tflite",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub urls: Vec<String>,
    /// Destination, relative to the pipeline root unless absolute.
    pub target: PathBuf,
    pub user_agent: String,
    /// Applied to connecting and to each read, not to the whole transfer.
    pub timeout_secs: u64,
    /// Smallest body accepted as a model; anything shorter is an error page.
    pub min_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            urls: DEFAULT_MODEL_URLS.iter().map(ToString::to_string).collect(),
            target: PathBuf::from("app/src/main/assets/haram_detector.tflite"),
            user_agent: "Mozilla/5.0".to_string(),
            timeout_secs: 15,
            min_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptStatus {
    Accepted { bytes: usize },
    TooSmall { bytes: usize },
    HttpStatus { code: u16 },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub url: String,
    #[serde(flatten)]
    pub status: AttemptStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOutcome {
    /// Where the model was written, if any candidate was accepted.
    pub written: Option<PathBuf>,
    pub attempts: Vec<FetchAttempt>,
}

impl FetchOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        self.written.is_some()
    }
}

/// Try each candidate URL until one yields a plausible model file.
///
/// Returns an error only when the HTTP client cannot be built or the
/// accepted body cannot be written.
pub async fn fetch_model(config: &FetchConfig, root: &Path) -> TrainingResult<FetchOutcome> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let client = Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()?;
    let target = if config.target.is_absolute() { config.target.clone() } else { root.join(&config.target) };

    let mut attempts = Vec::with_capacity(config.urls.len());
    for url in &config.urls {
        info!("trying {url}");
        let status = match try_url(&client, url, config.min_bytes).await {
            Ok(body) => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, &body).map_err(|e| {
                    TrainingError::Artifact(format!("failed to write {}: {e}", target.display()))
                })?;
                info!("saved {} bytes to {}", body.len(), target.display());
                attempts.push(FetchAttempt {
                    url: url.clone(),
                    status: AttemptStatus::Accepted { bytes: body.len() },
                });
                return Ok(FetchOutcome { written: Some(target), attempts });
            }
            Err(status) => status,
        };
        warn!("{url}: {status:?}");
        attempts.push(FetchAttempt { url: url.clone(), status });
    }

    warn!("no candidate URL produced a model");
    Ok(FetchOutcome { written: None, attempts })
}

async fn try_url(client: &Client, url: &str, min_bytes: usize) -> Result<Vec<u8>, AttemptStatus> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AttemptStatus::Failed { error: e.to_string() })?;
    if !response.status().is_success() {
        return Err(AttemptStatus::HttpStatus { code: response.status().as_u16() });
    }
    let body = response.bytes().await.map_err(|e| AttemptStatus::Failed { error: e.to_string() })?;
    if body.len() < min_bytes {
        return Err(AttemptStatus::TooSmall { bytes: body.len() });
    }
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn config(server: &mockito::Server, paths: &[&str]) -> FetchConfig {
        FetchConfig {
            urls: paths.iter().map(|p| format!("{}{p}", server.url())).collect(),
            ..FetchConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.urls.len(), 8);
        assert_eq!(config.user_agent, "Mozilla/5.0");
        assert_eq!(config.timeout_secs, 15);
        assert_eq!(config.min_bytes, 100_000);
        assert!(config.target.ends_with("assets/haram_detector.tflite"));
    }

    #[tokio::test]
    async fn test_first_large_response_wins() {
        let mut server = mockito::Server::new_async().await;
        let _a = server.mock("GET", "/a").with_status(404).create();
        let _b = server.mock("GET", "/b").with_status(500).create();
        let c = server
            .mock("GET", "/c")
            .match_header("user-agent", "Mozilla/5.0")
            .with_status(200)
            .with_body(vec![7u8; 500_000])
            .create();
        let d = server.mock("GET", "/d").with_status(200).with_body(vec![1u8; 500_000]).expect(0).create();

        let temp = TempDir::new().unwrap();
        let outcome = fetch_model(&config(&server, &["/a", "/b", "/c", "/d"]), temp.path()).await.unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(outcome.attempts[0].status, AttemptStatus::HttpStatus { code: 404 });
        assert_eq!(outcome.attempts[2].status, AttemptStatus::Accepted { bytes: 500_000 });

        let written = std::fs::read(temp.path().join("app/src/main/assets/haram_detector.tflite")).unwrap();
        assert_eq!(written.len(), 500_000);
        assert!(written.iter().all(|b| *b == 7));
        c.assert();
        d.assert();
    }

    #[tokio::test]
    async fn test_small_bodies_are_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _a = server.mock("GET", "/a").with_status(200).with_body(vec![0u8; 99_999]).create();
        let _b = server.mock("GET", "/b").with_status(200).with_body("<html>not found</html>").create();

        let temp = TempDir::new().unwrap();
        let outcome = fetch_model(&config(&server, &["/a", "/b"]), temp.path()).await.unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.attempts[0].status, AttemptStatus::TooSmall { bytes: 99_999 });
        assert!(!temp.path().join("app").exists());
    }

    #[tokio::test]
    async fn test_slow_steady_body_is_not_cut_off() {
        let mut server = mockito::Server::new_async().await;
        let _a = server
            .mock("GET", "/slow")
            .with_status(200)
            .with_chunked_body(|w| {
                for _ in 0..6 {
                    w.write_all(&[3u8; 20_000])?;
                    w.flush()?;
                    std::thread::sleep(Duration::from_millis(400));
                }
                Ok(())
            })
            .create();

        let temp = TempDir::new().unwrap();
        let mut cfg = config(&server, &["/slow"]);
        cfg.timeout_secs = 1;
        let outcome = fetch_model(&cfg, temp.path()).await.unwrap();

        assert_eq!(outcome.attempts[0].status, AttemptStatus::Accepted { bytes: 120_000 });
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn test_exact_threshold_is_accepted() {
        let mut server = mockito::Server::new_async().await;
        let _a = server.mock("GET", "/a").with_status(200).with_body(vec![0u8; 100_000]).create();

        let temp = TempDir::new().unwrap();
        let mut cfg = config(&server, &["/a"]);
        cfg.target = temp.path().join("out/model.tflite");
        let outcome = fetch_model(&cfg, Path::new("/nonexistent")).await.unwrap();

        assert_eq!(outcome.written.as_deref(), Some(cfg.target.as_path()));
    }
}
