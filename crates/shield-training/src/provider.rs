//! Dataset providers: where labelled image archives come from.

use crate::error::{TrainingError, TrainingResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub const KAGGLE_API_BASE: &str = "https://www.kaggle.com";

/// Downloads a dataset archive into a staging directory.
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch `dataset` and return the path of the archive written under
    /// `staging_dir`.
    async fn download(&self, dataset: &str, staging_dir: &Path) -> TrainingResult<PathBuf>;
}

/// Kaggle API credentials (`username` + API `key`).
#[derive(Clone, Deserialize)]
pub struct KaggleCredentials {
    pub username: String,
    pub key: String,
}

impl std::fmt::Debug for KaggleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KaggleCredentials").field("username", &self.username).field("key", &"***").finish()
    }
}

impl KaggleCredentials {
    #[must_use]
    pub fn new(username: impl Into<String>, key: impl Into<String>) -> Self {
        Self { username: username.into(), key: key.into() }
    }

    /// `KAGGLE_USERNAME` and `KAGGLE_KEY`, when both are set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("KAGGLE_USERNAME").ok()?;
        let key = std::env::var("KAGGLE_KEY").ok()?;
        Some(Self { username, key })
    }

    /// Parse a `kaggle.json` file.
    pub fn from_file(path: &Path) -> TrainingResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrainingError::Acquisition(format!("failed to read {}: {e}", path.display()))
        })?;
        let creds: Self = serde_json::from_str(&content)?;
        if creds.username.is_empty() || creds.key.is_empty() {
            return Err(TrainingError::Acquisition(format!("{} has empty credentials", path.display())));
        }
        Ok(creds)
    }

    /// Environment first, then `$KAGGLE_CONFIG_DIR/kaggle.json`, then
    /// `<home>/.kaggle/kaggle.json`.
    pub fn discover(home: Option<&Path>) -> TrainingResult<Self> {
        if let Some(creds) = Self::from_env() {
            return Ok(creds);
        }
        let path = match std::env::var_os("KAGGLE_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir).join("kaggle.json"),
            None => home
                .ok_or_else(|| {
                    TrainingError::Acquisition(
                        "no Kaggle credentials: set KAGGLE_USERNAME/KAGGLE_KEY or create ~/.kaggle/kaggle.json"
                            .to_string(),
                    )
                })?
                .join(".kaggle")
                .join("kaggle.json"),
        };
        Self::from_file(&path)
    }
}

/// Kaggle dataset downloads over the public REST API.
#[derive(Debug, Clone)]
pub struct KaggleProvider {
    client: Client,
    base_url: String,
    credentials: KaggleCredentials,
}

impl KaggleProvider {
    pub fn new(credentials: KaggleCredentials) -> TrainingResult<Self> {
        let client = Client::builder().connect_timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, base_url: KAGGLE_API_BASE.to_string(), credentials })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn download_url(&self, dataset: &str) -> TrainingResult<String> {
        let (owner, slug) = split_dataset_id(dataset)?;
        Ok(format!("{}/api/v1/datasets/download/{owner}/{slug}", self.base_url))
    }
}

/// Split `owner/slug`, rejecting anything else.
pub fn split_dataset_id(dataset: &str) -> TrainingResult<(&str, &str)> {
    match dataset.split_once('/') {
        Some((owner, slug)) if !owner.is_empty() && !slug.is_empty() && !slug.contains('/') => Ok((owner, slug)),
        _ => Err(TrainingError::Acquisition(format!("dataset id must look like owner/slug, got {dataset:?}"))),
    }
}

#[async_trait]
impl DatasetProvider for KaggleProvider {
    fn name(&self) -> &'static str {
        "kaggle"
    }

    async fn download(&self, dataset: &str, staging_dir: &Path) -> TrainingResult<PathBuf> {
        let url = self.download_url(dataset)?;
        let (_, slug) = split_dataset_id(dataset)?;
        info!("downloading {dataset}");

        let mut response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.key))
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(TrainingError::Acquisition(format!(
                    "Kaggle rejected the credentials for {dataset} (HTTP {})",
                    response.status().as_u16()
                )));
            }
            s => {
                return Err(TrainingError::Acquisition(format!(
                    "download of {dataset} failed: HTTP {}",
                    s.as_u16()
                )));
            }
        }

        tokio::fs::create_dir_all(staging_dir).await?;
        let path = staging_dir.join(format!("{slug}.download"));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!("wrote {written} bytes to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dataset_id_validation() {
        assert_eq!(split_dataset_id("dansbecker/food-101").unwrap(), ("dansbecker", "food-101"));
        assert!(split_dataset_id("food-101").is_err());
        assert!(split_dataset_id("/food").is_err());
        assert!(split_dataset_id("a/b/c").is_err());
    }

    #[test]
    fn test_credentials_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kaggle.json");
        std::fs::write(&path, r#"{"username":"alice","key":"secret"}"#).unwrap();

        let creds = KaggleCredentials::from_file(&path).unwrap();
        assert_eq!(creds.username, "alice");
        assert!(!format!("{creds:?}").contains("secret"));

        std::fs::write(&path, r#"{"username":"","key":"secret"}"#).unwrap();
        assert!(KaggleCredentials::from_file(&path).is_err());
    }

    #[tokio::test]
    async fn test_download_streams_archive_to_staging() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/datasets/download/owner/images")
            .match_header("authorization", "Basic dTprZXk=")
            .with_status(200)
            .with_body(b"PK\x03\x04rest-of-archive".to_vec())
            .create();

        let temp = TempDir::new().unwrap();
        let provider = KaggleProvider::new(KaggleCredentials::new("u", "key")).unwrap().with_base_url(server.url());
        let path = provider.download("owner/images", &temp.path().join("staging")).await.unwrap();

        assert!(path.starts_with(temp.path().join("staging")));
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04rest-of-archive");
        mock.assert();
    }

    #[tokio::test]
    async fn test_download_reports_auth_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/api/v1/datasets/download/owner/images").with_status(401).create();

        let temp = TempDir::new().unwrap();
        let provider = KaggleProvider::new(KaggleCredentials::new("u", "bad")).unwrap().with_base_url(server.url());
        let err = provider.download("owner/images", temp.path()).await.unwrap_err();
        assert!(matches!(err, TrainingError::Acquisition(msg) if msg.contains("credentials")));
    }
}
