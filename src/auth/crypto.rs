//! Wallet signature verification
//!
//! Verifies ed25519 signatures produced by Solana-style wallets. Public keys
//! and signatures travel as base58 strings.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while decoding keys and signatures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid base58 encoding: {0}")]
    InvalidEncoding(String),

    #[error("Invalid public key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid public key: not a valid ed25519 point or of small order")]
    InvalidPublicKey,
}

/// A wallet's ed25519 public key
///
/// Construction always validates the point and refuses small-order keys,
/// so holding a `WalletPublicKey` means the bytes can be handed to the
/// verifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletPublicKey([u8; PUBLIC_KEY_LENGTH]);

impl WalletPublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Result<Self, CryptoError> {
        let key = VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        if key.is_weak() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl From<VerifyingKey> for WalletPublicKey {
    fn from(key: VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl FromStr for WalletPublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;

        let bytes: [u8; PUBLIC_KEY_LENGTH] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(decoded.len()))?;

        Self::from_bytes(bytes)
    }
}

impl TryFrom<String> for WalletPublicKey {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WalletPublicKey> for String {
    fn from(key: WalletPublicKey) -> Self {
        key.to_base58()
    }
}

impl fmt::Display for WalletPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for WalletPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletPublicKey({})", self.to_base58())
    }
}

/// Verify an ed25519 signature over `message`
///
/// Returns `false` for anything that is not a well-formed signature by the
/// given key. Inputs of the wrong length are rejected before any curve
/// arithmetic runs. Small-order keys never verify, and signatures are
/// checked with `verify_strict` so no non-canonical encoding passes.
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    if signature.len() != SIGNATURE_LENGTH || public_key.len() != PUBLIC_KEY_LENGTH {
        return false;
    }

    let Ok(key_bytes) = <[u8; PUBLIC_KEY_LENGTH]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    if verifying_key.is_weak() {
        return false;
    }
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };

    verifying_key.verify_strict(message, &signature).is_ok()
}

/// Decode a base58 signature string into raw bytes
///
/// Length is not checked here; `verify_signature` rejects bad lengths.
pub fn decode_signature(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// Encode raw signature bytes as base58
pub fn encode_signature(signature: &[u8]) -> String {
    bs58::encode(signature).into_string()
}
