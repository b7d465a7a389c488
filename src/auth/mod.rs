//! Authentication module
//!
//! Provides wallet-based sign-in using ed25519 public keys.
//! - Canonical sign-in message codec
//! - Single-use nonces with atomic consumption
//! - Signature verification and the credential verifier
//! - JWT session issuance

pub mod crypto;
mod jwt;
pub mod message;
pub mod nonce;
mod service;
pub mod verifier;

pub use crypto::{verify_signature, WalletPublicKey};
pub use jwt::{Claims, SessionError, SessionIssuer, SessionToken};
pub use message::{ParseError, SigninMessage, SigninMessageFields};
pub use nonce::{purge_expired_task, MemoryNonceStore, NonceGrant, NonceIssuer, PgNonceStore};
pub use service::{AuthError, AuthService};
pub use verifier::{
    CredentialVerifier, MessagePayload, RejectReason, SignedAttempt, VerificationResult,
    VerifierSettings,
};
