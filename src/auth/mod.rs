// Authentication module - bearer token check against the proxy secret

use axum::http::{header, HeaderMap};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    Missing,

    #[error("Authorization header must use the Bearer scheme")]
    Malformed,

    #[error("Invalid API key")]
    Invalid,
}

/// Holds the single configured proxy secret.
#[derive(Clone)]
pub struct Authenticator {
    secret: String,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator").finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(secret: impl Into<String>) -> Result<Self, ConfigError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret("PROXY_API_KEY"));
        }
        Ok(Self { secret })
    }

    /// Exact comparison of a presented token with the secret, in constant
    /// time for tokens of the secret's length.
    pub fn verify(&self, token: &str) -> bool {
        if token.len() != self.secret.len() {
            return false;
        }
        token.as_bytes().ct_eq(self.secret.as_bytes()).into()
    }

    /// Check the `Authorization: Bearer <token>` header of a request.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::Malformed)?;

        let token = bearer_token(value).ok_or(AuthError::Malformed)?;

        if self.verify(token) {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}

/// Token part of a `Bearer` credential; the scheme is case-insensitive.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
