//! Session token issuance and validation
//!
//! A successful sign-in is turned into a signed JWT bound to the wallet's
//! public key and the domain it signed in to.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::crypto::WalletPublicKey;

/// JWT-related errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Token decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// JWT claims for wallet sessions
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (base58 wallet public key)
    pub sub: String,
    /// Domain the wallet signed in to
    pub domain: String,
    /// JWT ID
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn wallet(&self) -> Result<WalletPublicKey, SessionError> {
        self.sub
            .parse()
            .map_err(|e: super::crypto::CryptoError| SessionError::InvalidToken(e.to_string()))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_default()
    }
}

/// Issued session handed back to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Issues and validates session tokens
#[derive(Clone)]
pub struct SessionIssuer {
    secret: String,
    ttl_seconds: i64,
}

impl SessionIssuer {
    pub fn new(secret: impl Into<String>, ttl_seconds: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_seconds,
        }
    }

    /// Issue a session for a verified wallet
    pub fn issue(
        &self,
        wallet: &WalletPublicKey,
        domain: &str,
    ) -> Result<SessionToken, SessionError> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.ttl_seconds);

        let claims = Claims {
            sub: wallet.to_base58(),
            domain: domain.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        let access_token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| SessionError::EncodingFailed(e.to_string()))?;

        Ok(SessionToken {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.ttl_seconds,
        })
    }

    /// Verify and decode a session token
    pub fn verify(&self, token: &str) -> Result<Claims, SessionError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => SessionError::TokenExpired,
            _ => SessionError::DecodingFailed(e.to_string()),
        })?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn test_wallet() -> WalletPublicKey {
        SigningKey::from_bytes(&[21u8; 32]).verifying_key().into()
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = SessionIssuer::new("test-secret-key", 900);
        let session = issuer.issue(&test_wallet(), "app.test").unwrap();
        assert_eq!(session.token_type, "Bearer");
        assert_eq!(session.expires_in, 900);

        let claims = issuer.verify(&session.access_token).unwrap();
        assert_eq!(claims.wallet().unwrap(), test_wallet());
        assert_eq!(claims.domain, "app.test");
        assert!(claims.expires_at() > Utc::now());
    }

    #[test]
    fn test_invalid_token() {
        let issuer = SessionIssuer::new("test-secret-key", 900);
        assert!(issuer.verify("invalid.token.here").is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let session = SessionIssuer::new("secret1", 900)
            .issue(&test_wallet(), "app.test")
            .unwrap();
        assert!(SessionIssuer::new("secret2", 900)
            .verify(&session.access_token)
            .is_err());
    }

    #[test]
    fn test_expired_token() {
        // Well beyond the default 60s leeway
        let issuer = SessionIssuer::new("test-secret-key", -600);
        let session = issuer.issue(&test_wallet(), "app.test").unwrap();
        assert!(matches!(
            issuer.verify(&session.access_token),
            Err(SessionError::TokenExpired)
        ));
    }
}
