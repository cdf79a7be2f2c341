//! First-contact authorizers.

use async_trait::async_trait;
use tracing::{debug, warn};

use wisp_core::{AuthDecision, Authorizer, SessionToken};

/// Permissive authorizer that accepts every token.
///
/// Only use in development or on a trusted loopback listener.
#[derive(Debug)]
pub struct AllowAll;

impl AllowAll {
    pub fn new() -> Self {
        warn!("AllowAll authorizer enabled - every client token will be accepted");
        Self
    }
}

impl Default for AllowAll {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _token: &SessionToken, _credentials: Option<&str>) -> AuthDecision {
        AuthDecision::Accepted
    }
}

/// Accepts clients presenting a configured shared secret.
pub struct SharedSecret {
    secret: String,
}

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret").finish_non_exhaustive()
    }
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl Authorizer for SharedSecret {
    async fn authorize(&self, token: &SessionToken, credentials: Option<&str>) -> AuthDecision {
        match credentials {
            Some(presented) if constant_time_eq(presented.as_bytes(), self.secret.as_bytes()) => {
                AuthDecision::Accepted
            }
            _ => {
                debug!(token = %token, "shared secret mismatch");
                AuthDecision::Denied
            }
        }
    }
}
