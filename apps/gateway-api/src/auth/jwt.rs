//! HS256 bearer-token verification.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::{AuthError, CredentialVerifier, Credentials, Identity};

/// Claims the gateway reads from a token. `iss`/`aud` are checked by
/// `jsonwebtoken` itself when configured.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Verifies tokens signed with a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        let mut required = vec!["exp"];
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
            required.push("iss");
        }
        match audience {
            Some(aud) => {
                validation.set_audience(&[aud]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(&required);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(?e, "token validation failed");
                AuthError::InvalidToken
            })
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let token = credentials
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredentials)?;

        let claims = self.decode(token)?;

        if let Some(claimed) = credentials.user_id.as_deref() {
            if claimed != claims.sub {
                return Err(AuthError::UserMismatch);
            }
        }

        Ok(Identity { user_id: claims.sub })
    }
}
