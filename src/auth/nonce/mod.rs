//! Single-use sign-in nonces
//!
//! A nonce binds one sign-in attempt to one server-side challenge. Stores
//! must implement `consume` as an atomic check-and-set: for a given token,
//! exactly one caller ever observes `true`, however many race.

mod memory;
mod postgres;

pub use memory::MemoryNonceStore;
pub use postgres::PgNonceStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use thiserror::Error;

/// Nonce store errors
#[derive(Error, Debug)]
pub enum NonceError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Too many outstanding nonces")]
    CapacityExceeded,
}

impl From<sqlx::Error> for NonceError {
    fn from(e: sqlx::Error) -> Self {
        NonceError::DatabaseError(e.to_string())
    }
}

/// A stored challenge
#[derive(Debug, Clone)]
pub struct NonceRecord {
    pub token: String,
    /// Opaque context of the requester (e.g. client address)
    pub issued_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl NonceRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Nonce handed to a client at the start of an attempt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceGrant {
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and consumes single-use nonces
#[async_trait]
pub trait NonceIssuer: Send + Sync {
    /// Create a fresh unguessable nonce
    async fn issue(&self, issued_to: Option<String>) -> Result<NonceGrant, NonceError>;

    /// Atomically consume a nonce
    ///
    /// Returns `true` iff the token existed, had not expired and had not
    /// been consumed before.
    async fn consume(&self, token: &str) -> Result<bool, NonceError>;

    /// Drop expired records, returning how many were removed
    async fn purge_expired(&self) -> Result<u64, NonceError>;

    /// Check the backing storage is reachable
    async fn health_check(&self) -> Result<(), NonceError> {
        Ok(())
    }

    /// Short name for health reporting
    fn backend_name(&self) -> &'static str;
}

/// Periodically drop expired nonces; runs until the task is aborted
pub async fn purge_expired_task(store: Arc<dyn NonceIssuer>, interval: std::time::Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "Starting nonce purge task");

    loop {
        tokio::time::sleep(interval).await;

        match store.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Purged expired nonces"),
            Err(e) => tracing::error!("Error purging expired nonces: {}", e),
        }
    }
}

/// Generate a cryptographically secure nonce (32 random bytes, hex)
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::message::{MAX_NONCE_LEN, MIN_NONCE_LEN};

    #[test]
    fn test_generated_nonce_shape() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 64);
        assert!(nonce.len() >= MIN_NONCE_LEN && nonce.len() <= MAX_NONCE_LEN);
        assert!(nonce.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_nonces_differ() {
        assert_ne!(generate_nonce(), generate_nonce());
    }
}
