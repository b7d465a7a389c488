//! Middleware for the sign-in API
//!
//! This module provides middleware for request tracing, security headers,
//! and session authentication.

pub mod auth;
mod security;
mod tracing;

pub use auth::AuthenticatedWallet;
pub use security::security_headers;
pub use tracing::request_tracing;
