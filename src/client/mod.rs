//! Client-side sign-in flow
//!
//! Drives one attempt at a time through
//! `Idle -> AwaitingNonce -> AwaitingSignature -> Submitting -> Authenticated | Failed`.
//! State is published on a `watch` channel; observers (a UI, a CLI) read it
//! and never drive it.
//!
//! Every attempt carries a generation number. `disconnect` bumps the
//! generation, which wakes a pending signature request and makes any late
//! result for the old generation land nowhere: a stale signature is never
//! submitted.

mod http;
mod local;
mod signer;

pub use http::HttpAuthBackend;
pub use local::InProcessBackend;
pub use signer::KeypairSigner;

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;

use crate::auth::crypto::encode_signature;
use crate::auth::{RejectReason, SessionToken, SigninMessage, WalletPublicKey};
use crate::models::VerifyRequest;

/// Errors a signing capability can report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("User declined to sign")]
    Declined,

    #[error("Wallet disconnected")]
    Disconnected,
}

/// Errors talking to the verifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected response ({status}): {body}")]
    UnexpectedResponse { status: u16, body: String },
}

/// Why an attempt ended in `Failed`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("{0}")]
    Rejected(RejectReason),

    #[error("Signer unavailable")]
    SignerUnavailable,

    /// The nonce's fate is unknown; a retry must fetch a new one
    #[error("Transport failure: {0}")]
    TransportFailure(String),
}

/// Observable state of the flow
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FlowState {
    #[default]
    Idle,
    AwaitingNonce,
    AwaitingSignature,
    Submitting,
    Authenticated {
        public_key: WalletPublicKey,
        session: SessionToken,
    },
    Failed {
        reason: FailureReason,
    },
}

impl FlowState {
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            FlowState::AwaitingNonce | FlowState::AwaitingSignature | FlowState::Submitting
        )
    }
}

/// How a call to [`ClientAuthFlow::sign_in`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Authenticated {
        public_key: WalletPublicKey,
        session: SessionToken,
    },
    Failed(FailureReason),
    /// Another attempt was already running, or a session is active
    Ignored,
    /// The attempt was invalidated by a disconnect before it finished
    Superseded,
}

/// Verifier's answer to a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted {
        public_key: WalletPublicKey,
        session: SessionToken,
    },
    Rejected(RejectReason),
}

/// A key holder able to sign messages, e.g. a browser wallet
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Public key of the connected account, `None` when disconnected
    fn public_key(&self) -> Option<WalletPublicKey>;

    /// Ask the holder to sign; may wait on the user indefinitely
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// The server side as seen by the client
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn fetch_nonce(&self) -> Result<String, TransportError>;

    async fn submit(&self, request: &VerifyRequest) -> Result<SubmitOutcome, TransportError>;
}

struct FlowInner {
    state: FlowState,
    generation: u64,
}

struct Shared {
    inner: Mutex<FlowInner>,
    state_tx: watch::Sender<FlowState>,
    generation_tx: watch::Sender<u64>,
}

/// Handle to the client sign-in state machine
pub struct ClientAuthFlow<B> {
    backend: Arc<B>,
    origin: String,
    statement: String,
    shared: Arc<Shared>,
}

impl<B> Clone for ClientAuthFlow<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            origin: self.origin.clone(),
            statement: self.statement.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<B: AuthBackend> ClientAuthFlow<B> {
    /// `origin` is the domain this client runs on; it goes into every
    /// message regardless of what the server suggests
    pub fn new(backend: B, origin: impl Into<String>, statement: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(FlowState::Idle);
        let (generation_tx, _) = watch::channel(0);

        Self {
            backend: Arc::new(backend),
            origin: origin.into(),
            statement: statement.into(),
            shared: Arc::new(Shared {
                inner: Mutex::new(FlowInner {
                    state: FlowState::Idle,
                    generation: 0,
                }),
                state_tx,
                generation_tx,
            }),
        }
    }

    pub fn state(&self) -> FlowState {
        self.lock().state.clone()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.shared.state_tx.subscribe()
    }

    /// Run one sign-in attempt with the given signer
    ///
    /// Call when the wallet becomes available. A call made while an attempt
    /// is in flight or a session is active is ignored. A previous failure is
    /// cleared first, so retrying always starts from a fresh nonce.
    pub async fn sign_in(&self, signer: &dyn WalletSigner) -> AttemptOutcome {
        let Some(generation) = self.begin() else {
            tracing::debug!("Sign-in already in progress or complete, ignoring trigger");
            return AttemptOutcome::Ignored;
        };
        let mut generation_rx = self.shared.generation_tx.subscribe();

        let Some(public_key) = signer.public_key() else {
            return self.fail(generation, FailureReason::SignerUnavailable);
        };

        let fetched = tokio::select! {
            biased;
            _ = superseded(&mut generation_rx, generation) => return AttemptOutcome::Superseded,
            fetched = self.backend.fetch_nonce() => fetched,
        };
        let nonce = match fetched {
            Ok(nonce) => nonce,
            Err(e) => return self.fail(generation, FailureReason::TransportFailure(e.to_string())),
        };

        let message = match SigninMessage::new(&self.origin, public_key, &self.statement, nonce) {
            Ok(message) => message.with_issued_at(Utc::now()),
            Err(e) => {
                return self.fail(
                    generation,
                    FailureReason::TransportFailure(format!("unusable challenge: {e}")),
                )
            }
        };

        if !self.transition(generation, FlowState::AwaitingSignature) {
            return AttemptOutcome::Superseded;
        }

        let payload = message.serialize();
        let signed = tokio::select! {
            biased;
            _ = superseded(&mut generation_rx, generation) => return AttemptOutcome::Superseded,
            signed = signer.sign_message(&payload) => signed,
        };
        let signature = match signed {
            Ok(signature) => signature,
            Err(e) => {
                tracing::info!(error = %e, "Wallet did not sign the sign-in message");
                return self.fail(generation, FailureReason::SignerUnavailable);
            }
        };

        // The account may have switched while the user was deciding
        if signer.public_key() != Some(public_key) {
            return self.fail(generation, FailureReason::SignerUnavailable);
        }

        if !self.transition(generation, FlowState::Submitting) {
            return AttemptOutcome::Superseded;
        }

        let request = VerifyRequest {
            message: (&message).into(),
            signature: encode_signature(&signature),
        };

        match self.backend.submit(&request).await {
            Ok(SubmitOutcome::Accepted {
                public_key: accepted,
                session,
            }) if accepted == public_key => {
                let state = FlowState::Authenticated {
                    public_key,
                    session: session.clone(),
                };
                if self.transition(generation, state) {
                    tracing::info!(wallet = %public_key, "Signed in");
                    AttemptOutcome::Authenticated {
                        public_key,
                        session,
                    }
                } else {
                    AttemptOutcome::Superseded
                }
            }
            Ok(SubmitOutcome::Accepted { .. }) => self.fail(
                generation,
                FailureReason::TransportFailure("server accepted a different key".to_string()),
            ),
            Ok(SubmitOutcome::Rejected(reason)) => {
                self.fail(generation, FailureReason::Rejected(reason))
            }
            Err(e) => self.fail(generation, FailureReason::TransportFailure(e.to_string())),
        }
    }

    /// The wallet went away: invalidate whatever attempt is running
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        self.shared.generation_tx.send_replace(inner.generation);

        if inner.state.is_in_flight() {
            tracing::info!("Wallet disconnected during sign-in");
            inner.state = FlowState::Failed {
                reason: FailureReason::SignerUnavailable,
            };
            self.shared.state_tx.send_replace(inner.state.clone());
        }
    }

    /// Return a finished flow to `Idle`; no-op while an attempt runs
    pub fn reset(&self) -> bool {
        let mut inner = self.lock();
        if inner.state.is_in_flight() {
            return false;
        }
        inner.generation += 1;
        self.shared.generation_tx.send_replace(inner.generation);
        inner.state = FlowState::Idle;
        self.shared.state_tx.send_replace(FlowState::Idle);
        true
    }

    fn lock(&self) -> MutexGuard<'_, FlowInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> Option<u64> {
        let mut inner = self.lock();
        if inner.state.is_in_flight() || matches!(inner.state, FlowState::Authenticated { .. }) {
            return None;
        }

        inner.generation += 1;
        self.shared.generation_tx.send_replace(inner.generation);
        inner.state = FlowState::AwaitingNonce;
        self.shared.state_tx.send_replace(FlowState::AwaitingNonce);
        Some(inner.generation)
    }

    /// Move to `state` if `generation` is still the current attempt
    fn transition(&self, generation: u64, state: FlowState) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.state = state.clone();
        self.shared.state_tx.send_replace(state);
        true
    }

    fn fail(&self, generation: u64, reason: FailureReason) -> AttemptOutcome {
        if self.transition(
            generation,
            FlowState::Failed {
                reason: reason.clone(),
            },
        ) {
            tracing::warn!(reason = %reason, "Sign-in failed");
            AttemptOutcome::Failed(reason)
        } else {
            AttemptOutcome::Superseded
        }
    }
}

/// Resolves once `generation` is no longer the current attempt
async fn superseded(generation_rx: &mut watch::Receiver<u64>, generation: u64) {
    let _ = generation_rx.wait_for(|current| *current != generation).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        AuthService, CredentialVerifier, MemoryNonceStore, SessionIssuer, VerifierSettings,
    };
    use chrono::Duration;
    use ed25519_dalek::{Signer, SigningKey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const DOMAIN: &str = "app.test";

    fn service() -> AuthService {
        let store = Arc::new(MemoryNonceStore::new(Duration::seconds(300), 100));
        AuthService::new(
            CredentialVerifier::new(store, VerifierSettings::default()),
            SessionIssuer::new("test-secret", 3600),
            DOMAIN,
            "Sign in to app.test",
        )
    }

    /// Counts submissions reaching the server
    struct CountingBackend {
        inner: InProcessBackend,
        submits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AuthBackend for CountingBackend {
        async fn fetch_nonce(&self) -> Result<String, TransportError> {
            self.inner.fetch_nonce().await
        }

        async fn submit(&self, request: &VerifyRequest) -> Result<SubmitOutcome, TransportError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            self.inner.submit(request).await
        }
    }

    fn counting_flow(origin: &str) -> (ClientAuthFlow<CountingBackend>, Arc<AtomicUsize>) {
        let submits = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            inner: InProcessBackend::new(Arc::new(service())),
            submits: submits.clone(),
        };
        (ClientAuthFlow::new(backend, origin, "Sign in to app.test"), submits)
    }

    struct OfflineBackend;

    #[async_trait]
    impl AuthBackend for OfflineBackend {
        async fn fetch_nonce(&self) -> Result<String, TransportError> {
            Err(TransportError::Request("connection refused".to_string()))
        }

        async fn submit(&self, _request: &VerifyRequest) -> Result<SubmitOutcome, TransportError> {
            Err(TransportError::Request("connection refused".to_string()))
        }
    }

    /// Signer that waits for the test to release each signature
    struct GatedSigner {
        key: SigningKey,
        account: Mutex<Option<WalletPublicKey>>,
        release: Notify,
    }

    impl GatedSigner {
        fn new(seed: u8) -> Self {
            let key = SigningKey::from_bytes(&[seed; 32]);
            let account = Mutex::new(Some(key.verifying_key().into()));
            Self {
                key,
                account,
                release: Notify::new(),
            }
        }

        fn switch_account(&self, seed: u8) {
            let other = SigningKey::from_bytes(&[seed; 32]);
            *self.account.lock().unwrap() = Some(other.verifying_key().into());
        }
    }

    #[async_trait]
    impl WalletSigner for GatedSigner {
        fn public_key(&self) -> Option<WalletPublicKey> {
            *self.account.lock().unwrap()
        }

        async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
            self.release.notified().await;
            Ok(self.key.sign(message).to_bytes().to_vec())
        }
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<FlowState>,
        predicate: impl FnMut(&FlowState) -> bool,
    ) {
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for flow state")
            .expect("flow dropped");
    }

    #[tokio::test]
    async fn test_successful_sign_in() {
        let (flow, submits) = counting_flow(DOMAIN);
        let signer = KeypairSigner::from_signing_key(SigningKey::from_bytes(&[41u8; 32]));
        let expected = signer.public_key().unwrap();

        let outcome = flow.sign_in(&signer).await;
        assert!(matches!(
            outcome,
            AttemptOutcome::Authenticated { public_key, .. } if public_key == expected
        ));
        assert!(matches!(flow.state(), FlowState::Authenticated { .. }));
        assert_eq!(submits.load(Ordering::SeqCst), 1);

        // Already signed in
        assert_eq!(flow.sign_in(&signer).await, AttemptOutcome::Ignored);
    }

    /// Keeps every submitted request
    struct RecordingBackend {
        inner: InProcessBackend,
        submitted: Arc<Mutex<Vec<VerifyRequest>>>,
    }

    #[async_trait]
    impl AuthBackend for RecordingBackend {
        async fn fetch_nonce(&self) -> Result<String, TransportError> {
            self.inner.fetch_nonce().await
        }

        async fn submit(&self, request: &VerifyRequest) -> Result<SubmitOutcome, TransportError> {
            self.submitted.lock().unwrap().push(request.clone());
            self.inner.submit(request).await
        }
    }

    #[tokio::test]
    async fn test_signature_covers_submitted_message_bytes() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let backend = RecordingBackend {
            inner: InProcessBackend::new(Arc::new(service())),
            submitted: submitted.clone(),
        };
        let flow = ClientAuthFlow::new(backend, DOMAIN, "Sign in to app.test");
        let signer = Arc::new(KeypairSigner::from_signing_key(SigningKey::from_bytes(
            &[47u8; 32],
        )));

        // Attempts run on spawned tasks in real clients
        let task = {
            let flow = flow.clone();
            let signer = signer.clone();
            tokio::spawn(async move { flow.sign_in(signer.as_ref()).await })
        };
        assert!(matches!(
            task.await.unwrap(),
            AttemptOutcome::Authenticated { .. }
        ));

        let requests = submitted.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        let message = requests[0].message.to_message().unwrap();
        let signature = crate::auth::crypto::decode_signature(&requests[0].signature).unwrap();
        assert!(crate::auth::verify_signature(
            message.public_key().as_bytes(),
            &message.serialize(),
            &signature
        ));
    }

    #[tokio::test]
    async fn test_declined_then_retry() {
        let (flow, submits) = counting_flow(DOMAIN);
        let signer = KeypairSigner::generate();
        signer.set_approval(false);

        assert_eq!(
            flow.sign_in(&signer).await,
            AttemptOutcome::Failed(FailureReason::SignerUnavailable)
        );
        assert_eq!(submits.load(Ordering::SeqCst), 0);

        assert!(flow.reset());
        assert_eq!(flow.state(), FlowState::Idle);

        signer.set_approval(true);
        assert!(matches!(
            flow.sign_in(&signer).await,
            AttemptOutcome::Authenticated { .. }
        ));
    }

    #[tokio::test]
    async fn test_disconnected_signer() {
        let (flow, _) = counting_flow(DOMAIN);
        let signer = KeypairSigner::generate();
        signer.disconnect();

        assert_eq!(
            flow.sign_in(&signer).await,
            AttemptOutcome::Failed(FailureReason::SignerUnavailable)
        );
    }

    #[tokio::test]
    async fn test_server_rejection_surfaces_reason() {
        let (flow, _) = counting_flow("evil.test");
        let signer = KeypairSigner::generate();

        assert_eq!(
            flow.sign_in(&signer).await,
            AttemptOutcome::Failed(FailureReason::Rejected(RejectReason::DomainMismatch))
        );
        assert_eq!(
            flow.state(),
            FlowState::Failed {
                reason: FailureReason::Rejected(RejectReason::DomainMismatch)
            }
        );
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let flow = ClientAuthFlow::new(OfflineBackend, DOMAIN, "S");
        let signer = KeypairSigner::generate();

        assert!(matches!(
            flow.sign_in(&signer).await,
            AttemptOutcome::Failed(FailureReason::TransportFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_while_awaiting_signature() {
        let (flow, submits) = counting_flow(DOMAIN);
        let signer = Arc::new(GatedSigner::new(42));
        let mut states = flow.subscribe();

        let task = {
            let flow = flow.clone();
            let signer = signer.clone();
            tokio::spawn(async move { flow.sign_in(signer.as_ref()).await })
        };

        wait_for_state(&mut states, |s| *s == FlowState::AwaitingSignature).await;
        flow.disconnect();
        signer.release.notify_one();

        assert_eq!(task.await.unwrap(), AttemptOutcome::Superseded);
        assert_eq!(
            flow.state(),
            FlowState::Failed {
                reason: FailureReason::SignerUnavailable
            }
        );
        assert_eq!(submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_trigger_ignored_while_in_flight() {
        let (flow, submits) = counting_flow(DOMAIN);
        let signer = Arc::new(GatedSigner::new(43));
        let mut states = flow.subscribe();

        let task = {
            let flow = flow.clone();
            let signer = signer.clone();
            tokio::spawn(async move { flow.sign_in(signer.as_ref()).await })
        };

        wait_for_state(&mut states, |s| *s == FlowState::AwaitingSignature).await;
        assert_eq!(flow.sign_in(signer.as_ref()).await, AttemptOutcome::Ignored);
        assert!(!flow.reset());

        signer.release.notify_one();
        assert!(matches!(
            task.await.unwrap(),
            AttemptOutcome::Authenticated { .. }
        ));
        assert_eq!(submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_account_switch_during_signing_is_not_submitted() {
        let (flow, submits) = counting_flow(DOMAIN);
        let signer = Arc::new(GatedSigner::new(44));
        let mut states = flow.subscribe();

        let task = {
            let flow = flow.clone();
            let signer = signer.clone();
            tokio::spawn(async move { flow.sign_in(signer.as_ref()).await })
        };

        wait_for_state(&mut states, |s| *s == FlowState::AwaitingSignature).await;
        signer.switch_account(45);
        signer.release.notify_one();

        assert_eq!(
            task.await.unwrap(),
            AttemptOutcome::Failed(FailureReason::SignerUnavailable)
        );
        assert_eq!(submits.load(Ordering::SeqCst), 0);
    }
}
