use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use tracing::{info, warn};

use nutshell_common::VerificationConfig;

use crate::error::FetchError;

// --- DocumentFetcher trait ---

/// Retrieves the raw body of a reference document. One call is one attempt;
/// retries and timeouts are applied by [`fetch_with_retry`].
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    const USER_AGENT: &'static str = concat!("nutshell-verify/", env!("CARGO_PKG_VERSION"));

    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        let response = self
            .http
            .get(parsed)
            .header(USER_AGENT, Self::USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;
        info!(url, bytes = body.len(), "Fetched reference document");
        Ok(body)
    }
}

/// Fetch `url` with a per-attempt timeout and exponential backoff between attempts.
/// Returns the last error once attempts are exhausted or the error is permanent.
pub async fn fetch_with_retry(
    fetcher: &dyn DocumentFetcher,
    url: &str,
    config: &VerificationConfig,
) -> Result<String, FetchError> {
    let attempts = config.fetch_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match tokio::time::timeout(config.fetch_timeout, fetcher.fetch(url)).await {
            Ok(Ok(body)) => return Ok(body),
            Ok(Err(e)) => e,
            Err(_) => FetchError::Timeout(config.fetch_timeout),
        };
        attempt += 1;

        if !err.is_retryable() {
            warn!(url, error = %err, "Permanent fetch failure");
            return Err(err);
        }
        if attempt >= attempts {
            return Err(err);
        }
        let backoff: Duration = config.backoff(attempt - 1);
        warn!(
            url,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Fetch failed, retrying"
        );
        tokio::time::sleep(backoff).await;
    }
}
