//! Shared bearer-token state observed by every service instance.

use std::sync::{Arc, PoisonError, RwLock};

/// Process-wide authentication context.
///
/// The token lives here and is only observed by services, never owned by
/// them. Rotating it with [`set_token`](AuthContext::set_token) makes every
/// service that shares this context rebuild its session before the next
/// request; in-flight requests keep the token they were built with.
#[derive(Debug, Default)]
pub struct AuthContext {
    token: RwLock<String>,
}

impl AuthContext {
    /// Create a shared context holding the given bearer token.
    pub fn new(token: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            token: RwLock::new(token.into()),
        })
    }

    /// Snapshot of the current token.
    pub fn current_token(&self) -> String {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the token, e.g. after a refresh.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token.into();
    }
}
