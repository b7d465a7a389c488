//! Server-side credential verification
//!
//! Turns a submitted `{message, signature}` pair into a verdict. Checks run
//! in a fixed order and stop at the first failure:
//!
//! 1. the message parses
//! 2. its domain matches the origin this server answers for
//! 3. its nonce is consumed (atomically; stays consumed whatever follows)
//! 4. its public key decodes
//! 5. the signature covers the canonical message bytes
//!
//! Every failure is reported as a [`VerificationResult::Rejected`]; nothing
//! escapes as an error.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::crypto::{decode_signature, verify_signature, WalletPublicKey};
use super::message::{ParseError, SigninMessage, SigninMessageFields};
use super::nonce::NonceIssuer;

/// Why an attempt was turned down
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    #[error("Malformed sign-in message")]
    MalformedMessage,

    #[error("Sign-in message domain does not match this server")]
    DomainMismatch,

    #[error("Nonce is unknown, expired or already used")]
    InvalidNonce,

    #[error("Signature does not match public key and message")]
    BadSignature,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MalformedMessage => "MALFORMED_MESSAGE",
            RejectReason::DomainMismatch => "DOMAIN_MISMATCH",
            RejectReason::InvalidNonce => "INVALID_NONCE",
            RejectReason::BadSignature => "BAD_SIGNATURE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "MALFORMED_MESSAGE" => Some(RejectReason::MalformedMessage),
            "DOMAIN_MISMATCH" => Some(RejectReason::DomainMismatch),
            "INVALID_NONCE" => Some(RejectReason::InvalidNonce),
            "BAD_SIGNATURE" => Some(RejectReason::BadSignature),
            _ => None,
        }
    }
}

/// Outcome of verifying one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    Accepted { public_key: WalletPublicKey },
    Rejected { reason: RejectReason },
}

impl VerificationResult {
    pub fn rejected(reason: RejectReason) -> Self {
        VerificationResult::Rejected { reason }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, VerificationResult::Accepted { .. })
    }
}

/// A sign-in message as submitted: canonical text or individual fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePayload {
    Text(String),
    Fields(SigninMessageFields),
}

impl MessagePayload {
    pub fn to_message(&self) -> Result<SigninMessage, ParseError> {
        match self {
            MessagePayload::Text(text) => SigninMessage::parse(text.as_bytes()),
            MessagePayload::Fields(fields) => SigninMessage::try_from(fields.clone()),
        }
    }
}

impl From<&SigninMessage> for MessagePayload {
    fn from(message: &SigninMessage) -> Self {
        MessagePayload::Fields(message.clone().into())
    }
}

/// A message plus the signature claimed over it
#[derive(Debug, Clone)]
pub struct SignedAttempt {
    pub message: MessagePayload,
    pub signature: Vec<u8>,
}

impl SignedAttempt {
    pub fn new(message: &SigninMessage, signature: Vec<u8>) -> Self {
        Self {
            message: message.into(),
            signature,
        }
    }

    /// Build an attempt from its wire form
    ///
    /// An undecodable signature becomes an empty one, so the attempt still
    /// goes through nonce consumption and then fails as `BadSignature`.
    pub fn from_wire(message: MessagePayload, signature: &str) -> Self {
        Self {
            message,
            signature: decode_signature(signature).unwrap_or_default(),
        }
    }
}

/// Timing knobs for the verifier
#[derive(Debug, Clone, Copy)]
pub struct VerifierSettings {
    /// Messages issued longer ago than this are stale
    pub max_message_age: Duration,
    /// Tolerated client clock drift
    pub clock_skew: Duration,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            max_message_age: Duration::seconds(300),
            clock_skew: Duration::seconds(60),
        }
    }
}

/// The authority deciding whether a sign-in attempt proves key ownership
#[derive(Clone)]
pub struct CredentialVerifier {
    nonces: Arc<dyn NonceIssuer>,
    settings: VerifierSettings,
}

impl CredentialVerifier {
    pub fn new(nonces: Arc<dyn NonceIssuer>, settings: VerifierSettings) -> Self {
        Self { nonces, settings }
    }

    pub fn nonces(&self) -> &Arc<dyn NonceIssuer> {
        &self.nonces
    }

    /// Verify an attempt against the origin the request arrived for
    pub async fn verify(&self, attempt: &SignedAttempt, request_origin: &str) -> VerificationResult {
        let result = self.evaluate(attempt, request_origin).await;

        match &result {
            VerificationResult::Accepted { public_key } => {
                tracing::info!(wallet = %public_key, domain = %request_origin, "Sign-in attempt accepted");
            }
            VerificationResult::Rejected { reason } => {
                tracing::warn!(code = reason.code(), domain = %request_origin, "Sign-in attempt rejected: {}", reason);
            }
        }

        result
    }

    async fn evaluate(&self, attempt: &SignedAttempt, request_origin: &str) -> VerificationResult {
        let message = match attempt.message.to_message() {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Sign-in message failed to parse");
                return VerificationResult::rejected(RejectReason::MalformedMessage);
            }
        };

        if message.domain() != request_origin {
            return VerificationResult::rejected(RejectReason::DomainMismatch);
        }

        match self.nonces.consume(message.nonce()).await {
            Ok(true) => {}
            Ok(false) => return VerificationResult::rejected(RejectReason::InvalidNonce),
            Err(e) => {
                tracing::error!(error = %e, "Nonce store unavailable, failing closed");
                return VerificationResult::rejected(RejectReason::InvalidNonce);
            }
        }

        if let Some(issued_at) = message.issued_at() {
            let now = Utc::now();
            if issued_at > now + self.settings.clock_skew
                || issued_at < now - self.settings.max_message_age - self.settings.clock_skew
            {
                return VerificationResult::rejected(RejectReason::InvalidNonce);
            }
        }

        let public_key = match WalletPublicKey::from_bytes(*message.public_key().as_bytes()) {
            Ok(key) => key,
            Err(_) => return VerificationResult::rejected(RejectReason::MalformedMessage),
        };

        if !verify_signature(
            public_key.as_bytes(),
            &message.serialize(),
            &attempt.signature,
        ) {
            return VerificationResult::rejected(RejectReason::BadSignature);
        }

        VerificationResult::Accepted { public_key }
    }
}
