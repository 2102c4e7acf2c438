// src/core/pipeline/transport.rs

//! The retrying upstream transport.
//!
//! Wraps the shared HTTP client with bounded retries: transient transport
//! errors (timeout, connect, reset) and the retryable statuses 502/503/504
//! plus 408/429 back off exponentially with jitter. Other responses return
//! immediately. Requests whose body cannot be cloned are sent exactly once.

use crate::config::UpstreamConfig;
use crate::core::errors::ProxyError;
use crate::core::metrics;
use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// A reqwest client with retry/backoff policy applied per request.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl RetryingClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// The underlying client, for callers composing their own requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Executes a request with retries. Context cancellation (the caller
    /// dropping this future) aborts immediately; the backoff sleeps are
    /// ordinary await points.
    pub async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, ProxyError> {
        let mut attempt: u32 = 0;
        let mut request = Some(request);
        loop {
            attempt += 1;
            let current = request
                .take()
                .ok_or_else(|| ProxyError::Internal("retry without request".to_string()))?;
            // Keep a clone for the next attempt; a streaming body cannot be
            // cloned and disables retries for this request.
            let retry_copy = current.try_clone();

            match self.client.execute(current).await {
                Ok(response) => {
                    let status = response.status();
                    if is_retryable_status(status)
                        && attempt < self.config.max_retries
                        && retry_copy.is_some()
                    {
                        debug!(
                            "Upstream answered {status}; retrying (attempt {attempt}/{}).",
                            self.config.max_retries
                        );
                        request = retry_copy;
                        self.backoff(attempt).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if is_transient(&e) && attempt < self.config.max_retries && retry_copy.is_some()
                    {
                        debug!(
                            "Transient upstream error '{e}'; retrying (attempt {attempt}/{}).",
                            self.config.max_retries
                        );
                        request = retry_copy;
                        self.backoff(attempt).await;
                        continue;
                    }
                    return Err(ProxyError::UpstreamTransient(e.to_string()));
                }
            }
        }
    }

    /// Sleeps `min(max_delay, base * 2^(attempt-1)) * rand[0.5, 1.0)`.
    async fn backoff(&self, attempt: u32) {
        metrics::UPSTREAM_RETRIES_TOTAL.inc();
        let jitter: f64 = rand::thread_rng().gen_range(0.5..1.0);
        tokio::time::sleep(backoff_delay(&self.config, attempt, jitter)).await;
    }
}

/// Statuses the transport retries: bad-gateway family plus 408/429.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 502 | 503 | 504)
}

/// Transport-level errors worth retrying: timeouts, connect failures, and
/// resets surfaced as request errors.
pub fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Computes the nth backoff delay for a given jitter factor.
pub fn backoff_delay(config: &UpstreamConfig, attempt: u32, jitter: f64) -> Duration {
    let exp = config
        .retry_base_delay
        .saturating_mul(1u32 << (attempt - 1).min(16));
    exp.min(config.retry_max_delay).mul_f64(jitter)
}
