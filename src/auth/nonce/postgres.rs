//! Postgres-backed nonce store.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use super::{generate_nonce, NonceError, NonceGrant, NonceIssuer};

/// Nonce store shared by every server instance behind one database
///
/// Only SHA-256 hashes of tokens are stored.
#[derive(Clone)]
pub struct PgNonceStore {
    db_pool: PgPool,
    ttl: Duration,
}

impl PgNonceStore {
    pub fn new(db_pool: PgPool, ttl: Duration) -> Self {
        Self { db_pool, ttl }
    }

    /// Create the nonce table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), NonceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signin_nonces (
                id UUID PRIMARY KEY,
                token_hash TEXT NOT NULL UNIQUE,
                issued_to TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMPTZ NOT NULL,
                consumed BOOLEAN NOT NULL DEFAULT FALSE,
                consumed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS signin_nonces_expires_at_idx
            ON signin_nonces (expires_at)
            "#,
        )
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl NonceIssuer for PgNonceStore {
    async fn issue(&self, issued_to: Option<String>) -> Result<NonceGrant, NonceError> {
        let nonce = generate_nonce();
        let now = Utc::now();
        let expires_at = now + self.ttl;

        sqlx::query(
            r#"
            INSERT INTO signin_nonces (id, token_hash, issued_to, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(hash_token(&nonce))
        .bind(&issued_to)
        .bind(now)
        .bind(expires_at)
        .execute(&self.db_pool)
        .await?;

        Ok(NonceGrant { nonce, expires_at })
    }

    async fn consume(&self, token: &str) -> Result<bool, NonceError> {
        // Single conditional UPDATE: the row lock makes this the only
        // check-and-set, so at most one concurrent caller changes the row
        let rows_affected = sqlx::query(
            r#"
            UPDATE signin_nonces
            SET consumed = TRUE, consumed_at = NOW()
            WHERE token_hash = $1 AND consumed = FALSE AND expires_at > NOW()
            "#,
        )
        .bind(hash_token(token))
        .execute(&self.db_pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn purge_expired(&self) -> Result<u64, NonceError> {
        let rows_affected = sqlx::query(
            r#"
            DELETE FROM signin_nonces WHERE expires_at <= NOW()
            "#,
        )
        .execute(&self.db_pool)
        .await?
        .rows_affected();

        Ok(rows_affected)
    }

    async fn health_check(&self) -> Result<(), NonceError> {
        sqlx::query("SELECT 1").execute(&self.db_pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
