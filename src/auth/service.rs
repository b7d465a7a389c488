//! Authentication service
//!
//! Core business logic for wallet sign-in: hands out challenges, runs the
//! credential verifier and turns an accepted attempt into a session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

use crate::models::{ChallengeResponse, SignInResponse};

use super::jwt::{Claims, SessionError, SessionIssuer};
use super::nonce::{NonceError, NonceIssuer};
use super::verifier::{CredentialVerifier, RejectReason, SignedAttempt, VerificationResult};

/// Auth service errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Sign-in rejected: {0}")]
    Rejected(RejectReason),

    #[error("Nonce store error: {0}")]
    Nonce(#[from] NonceError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    verifier: CredentialVerifier,
    sessions: SessionIssuer,
    domain: String,
    statement: String,
    /// Signed-out session ids, kept until the token would have expired
    revoked: Arc<DashMap<String, DateTime<Utc>>>,
}

impl AuthService {
    /// Create a new AuthService for one expected sign-in domain
    pub fn new(
        verifier: CredentialVerifier,
        sessions: SessionIssuer,
        domain: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        Self {
            verifier,
            sessions,
            domain: domain.into(),
            statement: statement.into(),
            revoked: Arc::new(DashMap::new()),
        }
    }

    /// Generate a nonce challenge for a new sign-in attempt
    pub async fn issue_challenge(
        &self,
        issued_to: Option<String>,
    ) -> Result<ChallengeResponse, AuthError> {
        let grant = self.verifier.nonces().issue(issued_to).await?;

        tracing::debug!(expires_at = %grant.expires_at, "Issued sign-in nonce");

        Ok(ChallengeResponse {
            nonce: grant.nonce,
            domain: self.domain.clone(),
            statement: self.statement.clone(),
            expires_at: grant.expires_at,
        })
    }

    /// Verify a signed attempt and issue a session on success
    pub async fn sign_in(&self, attempt: &SignedAttempt) -> Result<SignInResponse, AuthError> {
        match self.verifier.verify(attempt, &self.domain).await {
            VerificationResult::Accepted { public_key } => {
                let session = self.sessions.issue(&public_key, &self.domain)?;
                Ok(SignInResponse {
                    public_key,
                    session,
                })
            }
            VerificationResult::Rejected { reason } => Err(AuthError::Rejected(reason)),
        }
    }

    /// Validate a session token
    pub fn verify_session(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.sessions.verify(token)?;
        if claims.domain != self.domain {
            return Err(SessionError::InvalidToken("token issued for another domain".to_string()).into());
        }
        if self.revoked.contains_key(&claims.jti) {
            return Err(SessionError::InvalidToken("session signed out".to_string()).into());
        }
        Ok(claims)
    }

    /// Sign a session out; its token is refused until it expires
    pub fn revoke_session(&self, jti: &str, expires_at: DateTime<Utc>) {
        let now = Utc::now();
        self.revoked.retain(|_, until| *until > now);
        self.revoked.insert(jti.to_string(), expires_at);

        tracing::info!(jti, "Session revoked");
    }

    /// Domain this service authenticates for
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Statement shown to the signer
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// Nonce store (for health checks and background purging)
    pub fn nonces(&self) -> &Arc<dyn NonceIssuer> {
        self.verifier.nonces()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::message::SigninMessage;
    use crate::auth::nonce::MemoryNonceStore;
    use crate::auth::verifier::VerifierSettings;
    use chrono::{Duration, Utc};
    use ed25519_dalek::{Signer, SigningKey};

    fn service() -> AuthService {
        let store = Arc::new(MemoryNonceStore::new(Duration::seconds(300), 100));
        AuthService::new(
            CredentialVerifier::new(store, VerifierSettings::default()),
            SessionIssuer::new("test-secret", 3600),
            "app.test",
            "Sign in to app.test",
        )
    }

    #[tokio::test]
    async fn test_challenge_then_sign_in() {
        let service = service();
        let key = SigningKey::from_bytes(&[31u8; 32]);

        let challenge = service.issue_challenge(None).await.unwrap();
        assert_eq!(challenge.domain, "app.test");

        let message = SigninMessage::new(
            challenge.domain,
            key.verifying_key().into(),
            challenge.statement,
            challenge.nonce,
        )
        .unwrap()
        .with_issued_at(Utc::now());
        let attempt = SignedAttempt::new(
            &message,
            key.sign(&message.serialize()).to_bytes().to_vec(),
        );

        let response = service.sign_in(&attempt).await.unwrap();
        assert_eq!(response.public_key, *message.public_key());

        let claims = service
            .verify_session(&response.session.access_token)
            .unwrap();
        assert_eq!(claims.sub, message.public_key().to_base58());

        assert!(matches!(
            service.sign_in(&attempt).await,
            Err(AuthError::Rejected(RejectReason::InvalidNonce))
        ));
    }

    #[tokio::test]
    async fn test_session_for_other_domain_rejected() {
        let service = service();
        let key = SigningKey::from_bytes(&[31u8; 32]);
        let foreign = SessionIssuer::new("test-secret", 3600)
            .issue(&key.verifying_key().into(), "other.test")
            .unwrap();

        assert!(service.verify_session(&foreign.access_token).is_err());
    }

    #[test]
    fn test_revoked_session_rejected() {
        let service = service();
        let key = SigningKey::from_bytes(&[33u8; 32]);
        let wallet: crate::auth::WalletPublicKey = key.verifying_key().into();
        let first = service.sessions.issue(&wallet, "app.test").unwrap();
        let second = service.sessions.issue(&wallet, "app.test").unwrap();

        let claims = service.verify_session(&first.access_token).unwrap();
        service.revoke_session(&claims.jti, claims.expires_at());

        assert!(matches!(
            service.verify_session(&first.access_token),
            Err(AuthError::Session(SessionError::InvalidToken(_)))
        ));
        // Other sessions of the same wallet stay valid
        assert!(service.verify_session(&second.access_token).is_ok());
    }
}
