//! Rate-limited HTTP fetcher shared by the listing poller and the detail worker.
//!
//! Two limits apply to every request:
//!
//! - a concurrency bound (a [`Semaphore`] with `http.concurrency` permits);
//! - a global requests-per-second ceiling (a `governor` token bucket
//!   refilled at `http.rate_limit_rps`, holding at most `http.burst` tokens).
//!
//! A caller first takes a permit, then waits for a token, then sends. The
//! whole sequence, including reading the body, is bounded by
//! `http.timeout_secs`; when it elapses the caller gets
//! [`FetchError::Timeout`] and releases whatever it held.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::HttpConfig;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A fetch attempt failed. Never fatal to the caller's loop.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("network error: {0}")]
    Network(String),
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

pub struct RateLimitedFetcher {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    limiter: DirectRateLimiter,
    timeout: Duration,
    concurrency: usize,
}

impl RateLimitedFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid http.user_agent")?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .context("Invalid http.accept_language")?,
        );

        if !config.verify_tls {
            tracing::warn!("TLS certificate verification is disabled for catalog requests");
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .context("Failed to build HTTP client")?;

        let period = Duration::from_secs_f64(1.0 / config.rate_limit_rps);
        let burst = NonZeroU32::new(config.burst).context("http.burst must be >= 1")?;
        let quota = Quota::with_period(period)
            .context("http.rate_limit_rps is too high")?
            .allow_burst(burst);

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.concurrency)),
            limiter: RateLimiter::direct(quota),
            timeout: Duration::from_secs(config.timeout_secs),
            concurrency: config.concurrency,
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// GET `url` under the concurrency and rate limits.
    ///
    /// Non-2xx responses are returned as [`FetchError::HttpStatus`].
    pub async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        match tokio::time::timeout(self.timeout, self.fetch_limited(url)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(url, "fetch timed out");
                Err(FetchError::Timeout)
            }
        }
    }

    async fn fetch_limited(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Network("fetcher is shut down".into()))?;
        self.limiter.until_ready().await;

        let response = self.client.get(url).send().await.map_err(map_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url, status = status.as_u16(), "non-success status");
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let body = response.text().await.map_err(map_reqwest)?;
        Ok(FetchResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn map_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}
