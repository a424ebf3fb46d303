//! # Credential Verification Seam
//!
//! The pipeline authenticates every request through this trait before any
//! business logic runs. Credential internals (JWT validation, user lookup)
//! live behind the seam; the pipeline only needs pass/fail plus an identity.
//!
//! Auth failures are deterministic given the same token, so they are answered
//! with an `error` response and never retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authenticated principal attached to handler invocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable principal identifier
    pub subject: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),
}

/// External credential collaborator interface
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, auth_token: &str) -> Result<Identity, AuthError>;
}

/// Accept both `Bearer xxx` and bare `xxx` token forms
pub fn strip_bearer(token: &str) -> &str {
    let trimmed = token.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim(),
        _ => trimmed,
    }
}

/// Fixed token-to-identity map, for tests and local development
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    identities: dashmap::DashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(self, token: impl Into<String>, identity: Identity) -> Self {
        self.identities.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl AuthVerifier for StaticTokenVerifier {
    async fn verify(&self, auth_token: &str) -> Result<Identity, AuthError> {
        let token = strip_bearer(auth_token);
        if token.is_empty() {
            return Err(AuthError::MissingCredentials(
                "auth token required".to_string(),
            ));
        }
        self.identities
            .get(token)
            .map(|identity| identity.clone())
            .ok_or_else(|| AuthError::InvalidToken("token not recognized".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_bearer_variants() {
        assert_eq!(strip_bearer("abc123"), "abc123");
        assert_eq!(strip_bearer("Bearer abc123"), "abc123");
        assert_eq!(strip_bearer("bearer   abc123"), "abc123");
        assert_eq!(strip_bearer("  Bearer abc123  "), "abc123");
        assert_eq!(strip_bearer(""), "");
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let verifier = StaticTokenVerifier::new()
            .allow("good-token", Identity::new("user-1").with_display_name("Vika"));

        let identity = verifier.verify("Bearer good-token").await.unwrap();
        assert_eq!(identity.subject, "user-1");

        let err = verifier.verify("bad-token").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));

        let err = verifier.verify("   ").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials(_)));
    }
}
