//! Local keypair signer.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use super::{SignerError, WalletSigner};
use crate::auth::WalletPublicKey;

/// Software wallet holding an ed25519 key in memory
///
/// Connection and approval can be toggled to stand in for a user closing
/// their wallet or pressing "reject".
pub struct KeypairSigner {
    key: SigningKey,
    connected: AtomicBool,
    approve: AtomicBool,
}

impl KeypairSigner {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_signing_key(key: SigningKey) -> Self {
        Self {
            key,
            connected: AtomicBool::new(true),
            approve: AtomicBool::new(true),
        }
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Whether signature requests are approved
    pub fn set_approval(&self, approve: bool) {
        self.approve.store(approve, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletSigner for KeypairSigner {
    fn public_key(&self) -> Option<WalletPublicKey> {
        self.connected
            .load(Ordering::SeqCst)
            .then(|| self.key.verifying_key().into())
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SignerError::Disconnected);
        }
        if !self.approve.load(Ordering::SeqCst) {
            return Err(SignerError::Declined);
        }
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}
