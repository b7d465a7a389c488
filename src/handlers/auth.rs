//! Authentication HTTP handlers
//!
//! Endpoints for wallet sign-in.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::StatusCode,
    Json,
};
use std::net::SocketAddr;

use super::AuthenticatedWallet;
use crate::auth::{RejectReason, SignedAttempt};
use crate::error::ApiError;
use crate::models::{
    ChallengeResponse, ProtectedResponse, SessionResponse, SignInResponse, VerifyRequest,
};
use crate::state::AppState;

/// POST /auth/nonce - Start a sign-in attempt
pub async fn request_nonce(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let issued_to = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
    let challenge = state.auth_service.issue_challenge(issued_to).await?;

    Ok(Json(challenge))
}

/// POST /auth/verify - Verify a signed message and issue a session
pub async fn verify_signature(
    State(state): State<AppState>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<SignInResponse>, ApiError> {
    let Json(req) = body.map_err(|e| {
        tracing::debug!(error = %e, "Unreadable verify request body");
        ApiError::SignInRejected(RejectReason::MalformedMessage)
    })?;

    let attempt = SignedAttempt::from_wire(req.message, &req.signature);
    let response = state.auth_service.sign_in(&attempt).await?;

    Ok(Json(response))
}

/// GET /auth/session - Current session
pub async fn get_session(wallet: AuthenticatedWallet) -> Json<SessionResponse> {
    Json(SessionResponse {
        public_key: wallet.public_key,
        domain: wallet.domain,
        expires_at: wallet.expires_at,
    })
}

/// POST /auth/logout - Sign the current session out
pub async fn logout(State(state): State<AppState>, wallet: AuthenticatedWallet) -> StatusCode {
    state
        .auth_service
        .revoke_session(&wallet.jti, wallet.expires_at);

    StatusCode::NO_CONTENT
}

/// GET /api/protected - Content only signed-in wallets may see
pub async fn get_protected(wallet: AuthenticatedWallet) -> Json<ProtectedResponse> {
    Json(ProtectedResponse {
        content: "This is protected content. You can access it because you signed in with your wallet.".to_string(),
        wallet: wallet.public_key,
    })
}
