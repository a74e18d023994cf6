//! Pluggable token-to-user resolution for the `authorize` handshake
//! (SPEC_FULL.md §5). Grounded on `manager/handlers.py`'s
//! `MessageHandler.validate_token` — "accept any non-empty token" is
//! explicitly a placeholder there (`# TODO: Implement proper token
//! validation`), so the default here stays a placeholder too, but a
//! `StaticTokenAuthenticator` is provided for deployments that configure
//! one shared secret.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Resolves a client-presented auth token to a user id, or rejects it.
pub trait TokenAuthenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<String>;
}

/// Accepts any non-empty token, deriving a stable synthetic user id from
/// its SHA-256 digest. Suitable for development and for gateways that
/// delegate real identity checks to an upstream proxy.
#[derive(Debug, Default)]
pub struct DefaultAuthenticator;

impl TokenAuthenticator for DefaultAuthenticator {
    fn authenticate(&self, token: &str) -> Option<String> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return None;
        }
        let digest = Sha256::digest(trimmed.as_bytes());
        Some(format!("user_{:x}", digest).chars().take(16).collect())
    }
}

/// Accepts only a single configured shared secret, compared in constant
/// time, mapping it to one fixed user id. Intended for single-tenant
/// deployments that front this gateway with their own auth layer and only
/// need to keep stray connections out.
pub struct StaticTokenAuthenticator {
    expected: String,
    user_id: String,
}

impl StaticTokenAuthenticator {
    pub fn new(expected_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            expected: expected_token.into(),
            user_id: user_id.into(),
        }
    }
}

impl TokenAuthenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: &str) -> Option<String> {
        let expected = self.expected.as_bytes();
        let given = token.as_bytes();
        if expected.len() == given.len() && bool::from(expected.ct_eq(given)) {
            Some(self.user_id.clone())
        } else {
            None
        }
    }
}
