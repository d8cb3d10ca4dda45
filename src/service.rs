//! Shared service base: per-instance session lifecycle tied to the auth
//! token, with transparent rebuild on token rotation.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use log::debug;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::http::{RetryPolicy, Session, Timeout};

/// Connect/read timeout for services that do not override it.
pub const DEFAULT_TIMEOUT: Timeout =
    Timeout::new(Duration::from_millis(9500), Duration::from_secs(30));

#[derive(Default)]
struct SessionState {
    session: Option<Arc<Session>>,
    /// Token the current session was built with.
    token: Option<String>,
}

/// Base for every API client: one backend URL, an observed auth context,
/// and a lazily built session that is replaced when the token rotates.
pub struct Service {
    base_url: String,
    auth: Arc<AuthContext>,
    timeout: Timeout,
    retry_policy: Option<RetryPolicy>,
    accept_invalid_certs: bool,
    state: Mutex<SessionState>,
}

impl Service {
    pub fn new(base_url: impl Into<String>, auth: Arc<AuthContext>) -> Self {
        Self {
            base_url: base_url.into(),
            auth,
            timeout: DEFAULT_TIMEOUT,
            retry_policy: None,
            accept_invalid_certs: false,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Override the timeout pair for every session this service builds.
    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pin the retry policy instead of drawing a fresh one per session.
    /// Without this, every session gets [`RetryPolicy::standard`] with its
    /// own backoff jitter.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Disable TLS verification for every session this service builds.
    /// Only for deployments without a usable trust anchor.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &Arc<AuthContext> {
        &self.auth
    }

    /// Returns the session for the current token, building one if none
    /// exists or the token rotated since the last call.
    ///
    /// Sessions are built fully before being published, so concurrent
    /// callers never see a half-constructed one. Concurrent callers that
    /// each observe a rotation may each build a session; the last one
    /// published wins, the others are dropped with their pools.
    pub fn get_session(&self) -> Result<Arc<Session>> {
        let current = self.auth.current_token();

        {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let (Some(session), Some(token)) = (&state.session, &state.token)
                && *token == current
            {
                return Ok(session.clone());
            }
        }

        let session = Arc::new(self.build_session(&current)?);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.session = Some(session.clone());
        state.token = Some(current);
        Ok(session)
    }

    fn build_session(&self, token: &str) -> Result<Session> {
        debug!("building session for {}...", self.base_url);
        let policy = self
            .retry_policy
            .clone()
            .unwrap_or_else(RetryPolicy::standard);
        Session::build(
            &self.base_url,
            token,
            self.timeout,
            policy,
            self.accept_invalid_certs,
        )
    }

    /// Issue a GET through the current session and decode the JSON body.
    #[tracing::instrument(skip(self, query))]
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.get_session()?.get_json(path, query).await
    }
}
