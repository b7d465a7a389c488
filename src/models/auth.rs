//! Authentication request/response models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{MessagePayload, SessionToken, WalletPublicKey};

/// Response containing the sign-in challenge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub nonce: String,
    pub domain: String,
    pub statement: String,
    pub expires_at: DateTime<Utc>,
}

/// Request to verify a signed sign-in message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// Canonical message text or its individual fields
    pub message: MessagePayload,
    /// Base58-encoded signature
    pub signature: String,
}

/// Successful sign-in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub public_key: WalletPublicKey,
    pub session: SessionToken,
}

/// Current session details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub public_key: WalletPublicKey,
    pub domain: String,
    pub expires_at: DateTime<Utc>,
}

/// Sample resource only visible to signed-in wallets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResponse {
    pub content: String,
    pub wallet: WalletPublicKey,
}
