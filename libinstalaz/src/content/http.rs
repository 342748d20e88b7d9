//! reqwest-backed content fetcher

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{ContentFetcher, FetchResult};
use crate::config::Config;
use crate::error::{ConfigError, ContentSourceError, Result};

/// HEAD checks are short; a slow answer counts as missing
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("instalaz/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.publisher.http_timeout)
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> FetchResult<String> {
        let unreachable = |e: reqwest::Error| ContentSourceError::Unreachable(format!("{}: {}", url, e));
        let response = self.client.get(url).send().await.map_err(unreachable)?;
        let response = response.error_for_status().map_err(unreachable)?;
        response.text().await.map_err(unreachable)
    }

    async fn exists(&self, url: &str) -> bool {
        match self.client.head(url).timeout(HEAD_TIMEOUT).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(%url, "HEAD failed: {}", e);
                false
            }
        }
    }
}
