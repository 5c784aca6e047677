use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

/// Source of page bodies for classification.
///
/// Implementations never fail: anything unusable comes back as an empty body.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> String;
}

/// Fetches pages over HTTP with a short timeout
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0")
            .build()?;
        Ok(Self { client })
    }

    async fn try_fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            log::debug!("Skipping body of {url}: HTTP {}", response.status());
            return Ok(String::new());
        }
        let is_text = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text"));
        if !is_text {
            log::debug!("Skipping non-text body of {url}");
            return Ok(String::new());
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> String {
        match self.try_fetch(url).await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Page fetch failed for {url}: {e}");
                String::new()
            }
        }
    }
}

/// Fetcher that never touches the network
pub struct NoFetch;

#[async_trait]
impl PageFetcher for NoFetch {
    async fn fetch(&self, _url: &str) -> String {
        String::new()
    }
}
