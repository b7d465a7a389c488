//! Liveness endpoints

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub nonce_store: String,
    pub version: String,
}

/// GET / - Banner
pub async fn root() -> &'static str {
    "Wallet Sign-In API Server"
}

/// GET /health - Health check
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let nonces = state.auth_service.nonces();
    let (status, nonce_store) = match nonces.health_check().await {
        Ok(()) => ("healthy", format!("{}: connected", nonces.backend_name())),
        Err(e) => ("unhealthy", format!("{}: error: {}", nonces.backend_name(), e)),
    };

    Json(HealthResponse {
        status: status.to_string(),
        nonce_store,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
