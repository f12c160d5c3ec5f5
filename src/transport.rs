//! Outbound HTTP with bounded exponential-backoff retry.
//!
//! Only transport failures, `429` and `503` are retried. Every other status is handed
//! back to the caller as a normal response.

use std::fmt;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Request, Response, StatusCode};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug)]
pub enum TransportError {
    /// The last attempt failed before a response arrived.
    Network(reqwest::Error),
    /// The server kept answering with a retryable status.
    Status { status: StatusCode, attempts: u32 },
    /// The caller's cancellation token fired.
    Cancelled,
    /// The request body cannot be replayed, so it cannot be retried.
    Unclonable,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Network(e) => write!(f, "{}", e),
            TransportError::Status { status, attempts } => {
                write!(f, "HTTP {} after {} retries", status.as_u16(), attempts)
            }
            TransportError::Cancelled => write!(f, "request cancelled"),
            TransportError::Unclonable => write!(f, "request body cannot be retried"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, given the current one and an optional server hint.
    ///
    /// A `Retry-After` hint replaces the computed delay; both are capped at `max_delay`.
    pub fn wait_for(&self, current: Duration, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or(current).min(self.max_delay)
    }

    /// Doubles a delay, saturating at `max_delay`.
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

/// Parses `Retry-After` in its delta-seconds form. Zero and HTTP-date values are ignored.
pub fn retry_after(response: &Response) -> Option<Duration> {
    let secs: u64 = response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Shared HTTP client plus retry policy, cloned into every adapter.
#[derive(Debug, Clone)]
pub struct RetryingTransport {
    client: Client,
    policy: BackoffPolicy,
    max_attempts: u32,
}

impl RetryingTransport {
    /// Builds a client with a per-request timeout and a browser-like user agent.
    pub fn new(
        request_timeout: Duration,
        policy: BackoffPolicy,
        max_attempts: u32,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self::with_client(client, policy, max_attempts))
    }

    pub fn with_client(client: Client, policy: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            client,
            policy,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sends with the transport's default attempt budget.
    pub async fn send(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        self.execute(request, self.max_attempts, cancel).await
    }

    /// Sends `request`, making at most `max_attempts` calls in total.
    pub async fn execute(
        &self,
        request: Request,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        let max_attempts = max_attempts.max(1);
        let mut delay = self.policy.base_delay;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            let this_try = request.try_clone().ok_or(TransportError::Unclonable)?;

            let hint = match self.client.execute(this_try).await {
                Ok(response) if !is_retryable(response.status()) => return Ok(response),
                Ok(response) => {
                    let hint = retry_after(&response);
                    last_error = Some(TransportError::Status {
                        status: response.status(),
                        attempts: attempt,
                    });
                    hint
                }
                Err(e) => {
                    last_error = Some(TransportError::Network(e));
                    None
                }
            };

            if attempt == max_attempts {
                break;
            }

            let wait = self.policy.wait_for(delay, hint);
            tracing::warn!(
                url = %request.url(),
                attempt,
                max_attempts,
                delay_ms = wait.as_millis() as u64,
                error = %last_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                "Retryable HTTP failure, backing off"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            delay = self.policy.next(wait);
        }

        Err(last_error.unwrap_or(TransportError::Cancelled))
    }
}
