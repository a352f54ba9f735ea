//! Fetching manifests and images relative to a firmware root

use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::SourceError;

/// Default HTTP request timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Retrieves files published next to the manifest
#[async_trait]
pub trait FirmwareFetcher: Send + Sync {
    /// Fetch `file`, a path relative to the firmware root
    async fn fetch(&self, file: &str) -> Result<Vec<u8>, SourceError>;
}

/// Reject absolute paths and paths leaving the firmware root
pub(crate) fn check_relative(file: &str) -> Result<(), SourceError> {
    let relative = !file.is_empty()
        && !file.contains('\\')
        && Path::new(file)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if relative {
        Ok(())
    } else {
        Err(SourceError::InvalidPath {
            path: file.to_string(),
        })
    }
}

/// Fetcher reading from a local directory
#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    /// Serve files below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Firmware root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FirmwareFetcher for FsFetcher {
    async fn fetch(&self, file: &str) -> Result<Vec<u8>, SourceError> {
        check_relative(file)?;
        let path = self.root.join(file);
        debug!(path = %path.display(), "Reading firmware file");

        tokio::fs::read(&path)
            .await
            .map_err(|e| SourceError::FetchFailed {
                file: file.to_string(),
                status: e.to_string(),
            })
    }
}

/// HTTP fetcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// URL of the directory holding `manifest.json`
    pub base_url: String,

    /// Whole-request timeout
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    /// `User-Agent` header
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: concat!("modflash/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    /// Configuration for `base_url` with default timeout and user agent
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Fetcher downloading over HTTP(S)
///
/// Requests carry `Cache-Control: no-store` so a freshly published manifest
/// is never served stale.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base: Url,
}

impl HttpFetcher {
    /// Build a fetcher for `config.base_url`
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidUrl`] when the base URL does not parse or
    /// the HTTP client cannot be created.
    pub fn new(config: FetchConfig) -> Result<Self, SourceError> {
        let invalid = |reason: String| SourceError::InvalidUrl {
            url: config.base_url.clone(),
            reason,
        };

        // Url::join replaces the last segment unless the base ends in '/'
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).map_err(|e| invalid(e.to_string()))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self { client, base })
    }

    /// Directory URL files are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base
    }
}

#[async_trait]
impl FirmwareFetcher for HttpFetcher {
    async fn fetch(&self, file: &str) -> Result<Vec<u8>, SourceError> {
        check_relative(file)?;
        let failed = |status: String| SourceError::FetchFailed {
            file: file.to_string(),
            status,
        };

        let url = self.base.join(file).map_err(|e| failed(e.to_string()))?;
        info!(%url, "Fetching");

        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!(
                "{} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        debug!(file, len = body.len(), "Fetched");
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_relative() {
        assert!(check_relative("fw.bin").is_ok());
        assert!(check_relative("stable/fw.bin").is_ok());
        assert!(check_relative("").is_err());
        assert!(check_relative("/fw.bin").is_err());
        assert!(check_relative("../fw.bin").is_err());
        assert!(check_relative("a\\b.bin").is_err());
    }

    #[test]
    fn test_base_url_gets_trailing_slash() -> Result<(), SourceError> {
        let fetcher = HttpFetcher::new(FetchConfig::new("https://example.com/firmware"))?;
        assert_eq!(fetcher.base_url().as_str(), "https://example.com/firmware/");
        Ok(())
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpFetcher::new(FetchConfig::new("not a url"));
        assert!(matches!(result, Err(SourceError::InvalidUrl { .. })));
    }

    #[test]
    fn test_fetch_config_serde() -> Result<(), serde_json::Error> {
        let config: FetchConfig =
            serde_json::from_str(r#"{"base_url": "https://fw.example", "timeout": 1500}"#)?;
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert!(config.user_agent.starts_with("modflash/"));
        Ok(())
    }
}
