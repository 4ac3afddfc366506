//! Climate TRACE assets client.
//!
//! Fetches one page of emissions sources from the Climate TRACE API.
//! See: https://api.climatetrace.org/v6/swagger/index.html
//! Data: CC BY 4.0, https://climatetrace.org/data

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Per-request timeout for a single page fetch.
const TRACE_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Failure to retrieve a page from the provider.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Climate TRACE request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Climate TRACE returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("Climate TRACE response decode error: {0}")]
    Decode(String),
}

/// One page of raw asset records.
///
/// Records are kept as raw JSON and only deserialized per record during
/// transformation, so one malformed asset cannot spoil the whole page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPage {
    #[serde(default)]
    assets: Option<Vec<serde_json::Value>>,
}

impl RawPage {
    #[cfg(test)]
    pub fn new(assets: Vec<serde_json::Value>) -> Self {
        Self {
            assets: Some(assets),
        }
    }

    pub fn records(&self) -> &[serde_json::Value] {
        self.assets.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// An empty page signals end-of-data.
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

/// Source of raw record pages.
pub trait PageFetcher: Send + Sync {
    /// Fetch the page starting at `offset` holding at most `limit` records,
    /// optionally filtered to `year`.
    fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
        year: Option<i32>,
    ) -> impl Future<Output = Result<RawPage, FetchError>> + Send;
}

/// Client for the Climate TRACE `/assets` listing.
#[derive(Debug, Clone)]
pub struct TraceClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl TraceClient {
    pub fn new(base_url: &str, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TRACE_REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a single `/assets` request, without any retry.
    async fn request_page(
        &self,
        offset: usize,
        limit: usize,
        year: Option<i32>,
    ) -> Result<RawPage, FetchError> {
        let url = format!("{}/assets", self.base_url);

        let mut query: Vec<(&str, String)> =
            vec![("limit", limit.to_string()), ("offset", offset.to_string())];
        if let Some(y) = year {
            query.push(("year", y.to_string()));
        }

        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, ua);
        }

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice::<RawPage>(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

impl PageFetcher for TraceClient {
    /// Fetch one page. If the request fails and a year filter was supplied,
    /// retry exactly once without it; some provider deployments reject `year`.
    async fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
        year: Option<i32>,
    ) -> Result<RawPage, FetchError> {
        match self.request_page(offset, limit, year).await {
            Ok(page) => Ok(page),
            Err(e) if year.is_some() => {
                tracing::warn!(
                    "Climate TRACE page at offset {} failed with year={:?} ({}), retrying without year",
                    offset,
                    year,
                    e
                );
                self.request_page(offset, limit, None).await
            }
            Err(e) => Err(e),
        }
    }
}
