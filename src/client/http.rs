//! HTTP backend for the client flow.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::{AuthBackend, SubmitOutcome, TransportError};
use crate::auth::RejectReason;
use crate::error::ErrorResponse;
use crate::models::{ChallengeResponse, SignInResponse, VerifyRequest};

/// Talks to the sign-in server's `/auth` routes
#[derive(Clone)]
pub struct HttpAuthBackend {
    client: Client,
    base_url: String,
}

impl HttpAuthBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Request(err.to_string())
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn fetch_nonce(&self) -> Result<String, TransportError> {
        let response = self.client.post(self.url("/auth/nonce")).send().await?;

        if !response.status().is_success() {
            return Err(TransportError::UnexpectedResponse {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let challenge: ChallengeResponse = response.json().await?;
        Ok(challenge.nonce)
    }

    async fn submit(&self, request: &VerifyRequest) -> Result<SubmitOutcome, TransportError> {
        let response = self
            .client
            .post(self.url("/auth/verify"))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::OK {
            let accepted: SignInResponse = serde_json::from_str(&body)
                .map_err(|e| TransportError::Request(format!("invalid sign-in response: {e}")))?;
            return Ok(SubmitOutcome::Accepted {
                public_key: accepted.public_key,
                session: accepted.session,
            });
        }

        if status.is_client_error() {
            if let Some(reason) = rejection_reason(&body) {
                return Ok(SubmitOutcome::Rejected(reason));
            }
        }

        Err(TransportError::UnexpectedResponse {
            status: status.as_u16(),
            body,
        })
    }
}

/// Map an error body back to a reject reason, if it carries one
fn rejection_reason(body: &str) -> Option<RejectReason> {
    let parsed: ErrorResponse = serde_json::from_str(body).ok()?;
    RejectReason::from_code(&parsed.error.code)
}
