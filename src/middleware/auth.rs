//! Session authentication
//!
//! Extractor for routes that require a signed-in wallet.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::auth::{AuthError, AuthService, SessionError, WalletPublicKey};
use crate::error::{ErrorDetails, ErrorResponse};

/// Wallet extracted from a valid session token
#[derive(Debug, Clone)]
pub struct AuthenticatedWallet {
    pub public_key: WalletPublicKey,
    pub domain: String,
    pub expires_at: DateTime<Utc>,
    pub jti: String,
}

fn reject(code: &str, message: &str) -> Response {
    let body = ErrorResponse {
        error: ErrorDetails {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Verifies the Bearer token from the Authorization header
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(wallet: AuthenticatedWallet) -> impl IntoResponse {
///     format!("Hello, {}", wallet.public_key)
/// }
/// ```
#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedWallet
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    reject(
                        "MISSING_TOKEN",
                        "Authorization header with Bearer token required",
                    )
                })?;

        let auth_service = Arc::<AuthService>::from_ref(state);

        let claims = auth_service
            .verify_session(bearer.token())
            .map_err(|e| match e {
                AuthError::Session(SessionError::TokenExpired) => {
                    reject("TOKEN_EXPIRED", "Token has expired")
                }
                _ => reject("INVALID_TOKEN", "Invalid token"),
            })?;

        let public_key = claims
            .wallet()
            .map_err(|_| reject("INVALID_TOKEN", "Invalid wallet in token"))?;

        Ok(AuthenticatedWallet {
            public_key,
            expires_at: claims.expires_at(),
            domain: claims.domain,
            jti: claims.jti,
        })
    }
}
