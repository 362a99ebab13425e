//! Blocking HTTP client with retry and exponential backoff.
//!
//! Retries connection failures, timeouts, HTTP 429 and 5xx. Every other status
//! is returned to the caller as-is, so API-level errors (such as a free-tier
//! range limit) are visible to the price fetcher.

use super::provider::{DataError, HttpFetcher, HttpResponse, QueryParams};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry/backoff settings for [`BackoffClient`].
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            user_agent: concat!("coinlab/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based): `base_delay * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// HTTP GET with retry/backoff over a blocking reqwest client.
pub struct BackoffClient {
    client: reqwest::blocking::Client,
    config: BackoffConfig,
}

impl BackoffClient {
    pub fn new(config: BackoffConfig) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DataError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

/// Whether a status is worth retrying.
fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Parse a response body as JSON, keeping non-JSON text for diagnostics.
fn parse_body(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

impl HttpFetcher for BackoffClient {
    fn get_json(&self, url: &str, params: &QueryParams) -> Result<HttpResponse, DataError> {
        let mut last_response: Option<HttpResponse> = None;
        let mut last_error: Option<DataError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.delay_for(attempt);
                debug!(url, attempt, delay_ms = delay.as_millis() as u64, "backing off");
                std::thread::sleep(delay);
            }

            match self.client.get(url).query(params).send() {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .map(parse_body)
                        .map_err(|e| DataError::Network(format!("read body from {url}: {e}")))?;
                    let response = HttpResponse {
                        status: status.as_u16(),
                        body,
                    };

                    if is_retryable(status) && attempt < self.config.max_retries {
                        warn!(url, status = status.as_u16(), attempt, "retryable HTTP status");
                        last_response = Some(response);
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        warn!(url, attempt, error = %e, "transient network error");
                        last_error = Some(DataError::Network(e.to_string()));
                        continue;
                    }
                    return Err(DataError::Network(e.to_string()));
                }
            }
        }

        // A late HTTP answer beats an earlier transport error.
        match (last_response, last_error) {
            (Some(response), _) => Ok(response),
            (None, Some(err)) => Err(err),
            (None, None) => Err(DataError::Network("max retries exceeded".into())),
        }
    }
}
