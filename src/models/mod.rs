//! Data models for the wallet sign-in API

pub mod auth;
pub use auth::*;
