//! A configured HTTP session: one base URL, one token snapshot, automatic
//! retry on transient failures.

use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use super::error::{ApiError, classify};
use super::retry::RetryPolicy;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("places-client/", env!("CARGO_PKG_VERSION"));

/// Connect/read timeout pair applied to every request.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    pub connect: Duration,
    pub read: Duration,
}

impl Timeout {
    pub const fn new(connect: Duration, read: Duration) -> Self {
        Self { connect, read }
    }
}

/// Outcome of a single attempt. Connect and read failures are separated
/// because read failures draw down their own retry budget.
enum Attempt {
    Success(Value),
    Failed { status: StatusCode, error: ApiError },
    ConnectError(reqwest::Error),
    ReadError(reqwest::Error),
}

/// An HTTP client bound to one base URL and one token snapshot.
///
/// Immutable once constructed; the owning service replaces it wholesale
/// when the token rotates, so callers never observe a partially updated
/// session. Dropping a session drops its connection pool.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    base_url: String,
    timeout: Timeout,
    policy: RetryPolicy,
}

impl Session {
    /// Build a session for `base_url` with the given token snapshot.
    ///
    /// Auth, content-type and user-agent headers are injected here, once;
    /// a token rotated later does not affect this session. TLS verification
    /// is on unless `accept_invalid_certs` is set (an explicit opt-out for
    /// deployments without a usable trust anchor).
    pub fn build(
        base_url: &str,
        token: &str,
        timeout: Timeout,
        policy: RetryPolicy,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(token).context("auth token is not a valid header value")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .connect_timeout(timeout.connect)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .context("Failed to construct HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            policy,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Performs a GET request against `base_url + path` and decodes the
    /// JSON response. Retries transparently per the session policy.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.request_json(Method::GET, path, query, None).await
    }

    /// Issues `method` against `base_url + path`, retrying per policy.
    ///
    /// A try is retried only if the method is in the policy whitelist and
    /// either the status is in the forcelist or a transient connect/read
    /// failure occurred. On a terminal non-2xx response the classified
    /// [`ApiError`] is raised; on success the decoded body is returned.
    #[tracing::instrument(skip(self, query))]
    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        read_timeout: Option<Duration>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let read_timeout = read_timeout.unwrap_or(self.timeout.read);
        let retryable_method = self.policy.is_retryable_method(&method);
        let mut read_budget = self.policy.max_read_retries;
        let mut attempt = 1;

        debug!("{} {}...", method, url);

        loop {
            let outcome = self
                .try_once(method.clone(), &url, query, read_timeout)
                .await?;

            match outcome {
                Attempt::Success(value) => return Ok(value),
                Attempt::Failed { status, error } => {
                    let retry = retryable_method
                        && self.policy.is_retryable_status(status.as_u16())
                        && attempt < self.policy.max_attempts;
                    if !retry {
                        debug!("{} {}: terminal HTTP {}", method, url, status);
                        return Err(error.into());
                    }
                    warn!(
                        "{} {}: HTTP {}, attempt {}/{} failed, retrying in {:?}...",
                        method,
                        url,
                        status,
                        attempt,
                        self.policy.max_attempts,
                        self.policy.backoff_delay(attempt)
                    );
                }
                Attempt::ConnectError(e) => {
                    if !(retryable_method && attempt < self.policy.max_attempts) {
                        return Err(ApiError::Transport(e.to_string()).into());
                    }
                    warn!(
                        "{} {}: connect failure ({}), attempt {}/{}, retrying in {:?}...",
                        method,
                        url,
                        e,
                        attempt,
                        self.policy.max_attempts,
                        self.policy.backoff_delay(attempt)
                    );
                }
                Attempt::ReadError(e) => {
                    if !(retryable_method && attempt < self.policy.max_attempts && read_budget > 0)
                    {
                        return Err(ApiError::Transport(e.to_string()).into());
                    }
                    read_budget -= 1;
                    warn!(
                        "{} {}: read failure ({}), {} read retries left, retrying in {:?}...",
                        method,
                        url,
                        e,
                        read_budget,
                        self.policy.backoff_delay(attempt)
                    );
                }
            }

            tokio::time::sleep(self.policy.backoff_delay(attempt)).await;
            attempt += 1;
        }
    }

    /// A single attempt. Only a 2xx body that fails to decode as JSON is an
    /// `Err` here; every other failure mode is an [`Attempt`] variant so the
    /// retry loop can decide.
    async fn try_once(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        read_timeout: Duration,
    ) -> Result<Attempt> {
        let response = match self
            .client
            .request(method, url)
            .query(query)
            .timeout(read_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Ok(Attempt::ReadError(e)),
            Err(e) => return Ok(Attempt::ConnectError(e)),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Ok(Attempt::ReadError(e)),
        };

        if let Some(error) = classify(status, &body) {
            return Ok(Attempt::Failed { status, error });
        }

        let value = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse JSON response from {}", url))?;
        Ok(Attempt::Success(value))
    }
}
