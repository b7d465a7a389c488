//! In-process nonce store backed by `DashMap`.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;

use super::{generate_nonce, NonceError, NonceGrant, NonceIssuer, NonceRecord};

/// Nonce store for single-instance deployments and tests
///
/// Consumption flips the record's `consumed` flag while holding the shard
/// write lock, so concurrent consumers of one token are serialized.
/// Issuance holds `issue_lock` across the capacity check and the insert, so
/// the store never holds more than `max_outstanding` records.
pub struct MemoryNonceStore {
    records: DashMap<String, NonceRecord>,
    issue_lock: Mutex<()>,
    ttl: Duration,
    max_outstanding: usize,
}

impl MemoryNonceStore {
    pub fn new(ttl: Duration, max_outstanding: usize) -> Self {
        Self {
            records: DashMap::new(),
            issue_lock: Mutex::new(()),
            ttl,
            max_outstanding,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn purge(&self) -> u64 {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired_at(now));
        (before - self.records.len()) as u64
    }
}

#[async_trait]
impl NonceIssuer for MemoryNonceStore {
    async fn issue(&self, issued_to: Option<String>) -> Result<NonceGrant, NonceError> {
        let _guard = self
            .issue_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.records.len() >= self.max_outstanding {
            let purged = self.purge();
            tracing::debug!(purged, "Nonce store full, purged expired records");
            if self.records.len() >= self.max_outstanding {
                return Err(NonceError::CapacityExceeded);
            }
        }

        let now = Utc::now();
        let record = NonceRecord {
            token: generate_nonce(),
            issued_to,
            created_at: now,
            expires_at: now + self.ttl,
            consumed: false,
        };
        let grant = NonceGrant {
            nonce: record.token.clone(),
            expires_at: record.expires_at,
        };

        self.records.insert(record.token.clone(), record);
        Ok(grant)
    }

    async fn consume(&self, token: &str) -> Result<bool, NonceError> {
        let Some(mut record) = self.records.get_mut(token) else {
            return Ok(false);
        };

        if record.consumed || record.is_expired_at(Utc::now()) {
            return Ok(false);
        }

        record.consumed = true;
        Ok(true)
    }

    async fn purge_expired(&self) -> Result<u64, NonceError> {
        Ok(self.purge())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> MemoryNonceStore {
        MemoryNonceStore::new(Duration::seconds(300), 1000)
    }

    #[tokio::test]
    async fn test_consume_once() {
        let store = store();
        let grant = store.issue(None).await.unwrap();

        assert!(store.consume(&grant.nonce).await.unwrap());
        assert!(!store.consume(&grant.nonce).await.unwrap());
        assert!(!store.consume(&grant.nonce).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_nonce_rejected() {
        let store = store();
        assert!(!store.consume("deadbeefdeadbeef").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_nonce_rejected() {
        let store = MemoryNonceStore::new(Duration::zero(), 1000);
        let grant = store.issue(None).await.unwrap();
        assert!(!store.consume(&grant.nonce).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_consume_single_winner() {
        let store = Arc::new(store());
        let grant = store.issue(Some("127.0.0.1".to_string())).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let nonce = grant.nonce.clone();
            handles.push(tokio::spawn(
                async move { store.consume(&nonce).await.unwrap() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryNonceStore::new(Duration::zero(), 1000);
        store.issue(None).await.unwrap();
        store.issue(None).await.unwrap();
        assert_eq!(store.len(), 2);

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_exceeded() {
        let store = MemoryNonceStore::new(Duration::seconds(300), 2);
        store.issue(None).await.unwrap();
        store.issue(None).await.unwrap();

        assert!(matches!(
            store.issue(None).await,
            Err(NonceError::CapacityExceeded)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issue_respects_capacity() {
        let store = Arc::new(MemoryNonceStore::new(Duration::seconds(300), 8));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.issue(None).await.is_ok() })
            })
            .collect();

        let mut issued = 0;
        for handle in handles {
            if handle.await.unwrap() {
                issued += 1;
            }
        }
        assert_eq!(issued, 8);
        assert_eq!(store.len(), 8);
    }

    #[tokio::test]
    async fn test_capacity_recovers_after_expiry() {
        let store = MemoryNonceStore::new(Duration::zero(), 1);
        store.issue(None).await.unwrap();
        assert!(store.issue(None).await.is_ok());
    }
}
