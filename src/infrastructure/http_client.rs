//! HTTP transport for listing crawls
//!
//! One client per source: each source gets its own cookie store and default
//! header set, and all requests share a rate limiter so page loops stay
//! polite regardless of how many units run concurrently.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;

use crate::domain::error::FetchError;

/// Transport seam used by the session provider and the paginated fetcher.
/// Tests substitute scripted implementations.
#[async_trait]
pub trait PageTransport: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, FetchError>;

    async fn post_form(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<String, FetchError>;
}

/// HTTP client configuration for one source.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub default_headers: Vec<(String, String)>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 15,
            max_requests_per_second: 3,
            default_headers: Vec::new(),
        }
    }
}

/// Rate-limited `reqwest` wrapper with a per-source cookie store.
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name '{name}'"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid header value for '{name:?}'"))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second.max(1))
                .context("Rate limit must be greater than 0")?,
        );

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    async fn read_body(url: &str, response: reqwest::Response) -> Result<String, FetchError> {
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))
    }
}

#[async_trait]
impl PageTransport for HttpClient {
    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.rate_limiter.until_ready().await;
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;
        Self::read_body(url, response).await
    }

    async fn post_form(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<String, FetchError> {
        self.rate_limiter.until_ready().await;
        tracing::debug!("POST {} ({} params)", url, params.len());

        let response = self
            .client
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;
        Self::read_body(url, response).await
    }
}
