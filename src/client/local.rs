//! In-process backend: the client flow talking to an `AuthService`
//! directly, without HTTP in between.

use std::sync::Arc;

use async_trait::async_trait;

use super::{AuthBackend, SubmitOutcome, TransportError};
use crate::auth::{AuthError, AuthService, SignedAttempt};
use crate::models::VerifyRequest;

pub struct InProcessBackend {
    service: Arc<AuthService>,
}

impl InProcessBackend {
    pub fn new(service: Arc<AuthService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl AuthBackend for InProcessBackend {
    async fn fetch_nonce(&self) -> Result<String, TransportError> {
        self.service
            .issue_challenge(None)
            .await
            .map(|challenge| challenge.nonce)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn submit(&self, request: &VerifyRequest) -> Result<SubmitOutcome, TransportError> {
        let attempt = SignedAttempt::from_wire(request.message.clone(), &request.signature);

        match self.service.sign_in(&attempt).await {
            Ok(response) => Ok(SubmitOutcome::Accepted {
                public_key: response.public_key,
                session: response.session,
            }),
            Err(AuthError::Rejected(reason)) => Ok(SubmitOutcome::Rejected(reason)),
            Err(e) => Err(TransportError::Request(e.to_string())),
        }
    }
}
