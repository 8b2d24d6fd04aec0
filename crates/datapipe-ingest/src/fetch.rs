//! Rate-limit aware HTTP fetching
//!
//! [`RetryingFetcher`] waits a fixed politeness delay before every call and
//! walks an escalating backoff schedule when the server answers 429. Once
//! the schedule is exhausted the caller gets [`FetchError::RateLimited`].

use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::FetchError;

const USER_AGENT: &str = concat!("datapipe-ingest/", env!("CARGO_PKG_VERSION"));

/// Delay and retry schedule for outbound calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before every attempt
    pub politeness_delay: Duration,
    /// Wait after the n-th consecutive 429
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            politeness_delay: Duration::from_secs(1),
            backoff: vec![Duration::from_secs(10), Duration::from_secs(60)],
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            politeness_delay: Duration::from_millis(config.politeness_delay_ms),
            backoff: config
                .rate_limit_backoff_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }

    /// Same backoff, no politeness delay
    pub fn without_delay(&self) -> Self {
        Self {
            politeness_delay: Duration::ZERO,
            backoff: self.backoff.clone(),
        }
    }

    pub fn max_attempts(&self) -> usize {
        1 + self.backoff.len()
    }
}

/// HTTP client wrapper applying a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Build the shared client used by all fetchers
    pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder().timeout(timeout).user_agent(USER_AGENT).build()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            client: self.client.clone(),
            policy,
        }
    }

    /// GET `url` and return the successful response
    pub async fn get(&self, url: &str) -> Result<Response, FetchError> {
        self.send(url, |client| client.get(url)).await
    }

    /// Issue the request produced by `build` until it succeeds, fails with a
    /// non-429 status, or the backoff schedule runs out.
    pub async fn send<F>(&self, url: &str, build: F) -> Result<Response, FetchError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if !self.policy.politeness_delay.is_zero() {
                tokio::time::sleep(self.policy.politeness_delay).await;
            }

            debug!(url = %url, attempt, "Sending request");
            let response = build(&self.client)
                .send()
                .await
                .map_err(|source| FetchError::Http {
                    url: url.to_string(),
                    source,
                })?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                match self.policy.backoff.get(attempt - 1) {
                    Some(wait) => {
                        warn!(url = %url, attempt, wait_secs = wait.as_secs_f64(), "Rate limited, backing off");
                        tokio::time::sleep(*wait).await;
                        continue;
                    },
                    None => {
                        warn!(url = %url, attempts = attempt, "Rate limit retries exhausted");
                        return Err(FetchError::RateLimited {
                            url: url.to_string(),
                            attempts: attempt,
                        });
                    },
                }
            }

            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            return Ok(response);
        }
    }

    /// Stream a successful response body into `path`, returning the byte count.
    pub async fn download_to<F>(&self, url: &str, build: F, path: &Path) -> Result<u64, FetchError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self.send(url, build).await?;
        let written = write_body(url, response, path).await?;
        info!(url = %url, path = %path.display(), bytes = written, "Download completed");
        Ok(written)
    }
}

async fn write_body(url: &str, response: Response, path: &Path) -> Result<u64, FetchError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::io(parent, e))?;
    }
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| FetchError::io(path, e))?;

    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(path, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| FetchError::io(path, e))?;
    Ok(written)
}
