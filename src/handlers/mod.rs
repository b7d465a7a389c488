//! API handlers for the sign-in server

pub mod auth;
pub mod health;

pub use auth::*;
pub use health::*;

// Re-export AuthenticatedWallet from middleware for handler use
pub use crate::middleware::auth::AuthenticatedWallet;
