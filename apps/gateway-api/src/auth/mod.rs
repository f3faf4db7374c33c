//! Credential verification for inbound connections and HTTP requests.

pub mod jwt;
pub mod middleware;

use std::fmt;

use async_trait::async_trait;

/// What a client presented when connecting.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Bearer token from the `token` query parameter or `Authorization` header.
    pub token: Option<String>,
    /// User id the client claims, from the `userId` query parameter.
    pub user_id: Option<String>,
}

/// A stable, verified user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingCredentials,
    InvalidToken,
    /// The claimed `userId` does not match the token subject.
    UserMismatch,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingCredentials => "User ID is required",
            Self::InvalidToken => "Invalid or expired token",
            Self::UserMismatch => "Token does not match user ID",
        })
    }
}

impl std::error::Error for AuthError {}

/// Turns presented credentials into an identity or rejects them.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> Result<Identity, AuthError>;
}

/// Development verifier: trusts the claimed `userId` outright. Use only when
/// no token secret is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedUserVerifier;

#[async_trait]
impl CredentialVerifier for TrustedUserVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let user_id = credentials
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(AuthError::MissingCredentials)?;
        Ok(Identity {
            user_id: user_id.to_string(),
        })
    }
}
