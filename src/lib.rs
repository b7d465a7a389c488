//! Wallet Sign-In Server Library
//!
//! Challenge-response authentication for ed25519 wallets: the server hands
//! out single-use nonces, the wallet signs a canonical sign-in message, and
//! the server verifies it before issuing a session.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;

use std::sync::Arc;

use chrono::Duration;

use auth::{AuthService, CredentialVerifier, NonceIssuer, SessionIssuer, VerifierSettings};
use config::Config;

/// Wire an `AuthService` from configuration and a nonce store
pub fn auth_service_from_config(config: &Config, nonces: Arc<dyn NonceIssuer>) -> AuthService {
    let settings = VerifierSettings {
        max_message_age: Duration::seconds(config.auth_nonce_ttl_seconds),
        clock_skew: Duration::seconds(config.auth_clock_skew_seconds),
    };

    AuthService::new(
        CredentialVerifier::new(nonces, settings),
        SessionIssuer::new(config.jwt_secret.clone(), config.session_ttl_seconds),
        config.signin_domain.clone(),
        config.signin_statement.clone(),
    )
}
