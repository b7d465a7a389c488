//! Sign in to a running server with a freshly generated keypair.
//!
//! Usage: `signin-demo [BASE_URL] [DOMAIN]`
//! Defaults to `http://localhost:3001` and `localhost:3001`.

use anyhow::bail;

use wallet_signin_server::client::{
    AttemptOutcome, ClientAuthFlow, HttpAuthBackend, KeypairSigner, WalletSigner,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let base_url = args
        .next()
        .unwrap_or_else(|| "http://localhost:3001".to_string());
    let domain = args.next().unwrap_or_else(|| "localhost:3001".to_string());

    let statement = "Sign in with your wallet. This request will not trigger a blockchain transaction or cost any fees.";
    let flow = ClientAuthFlow::new(HttpAuthBackend::new(base_url.as_str()), domain, statement);

    let mut states = flow.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            tracing::info!(?state, "Flow state changed");
        }
    });

    let signer = KeypairSigner::generate();
    if let Some(public_key) = signer.public_key() {
        tracing::info!(wallet = %public_key, "Generated demo wallet");
    }

    match flow.sign_in(&signer).await {
        AttemptOutcome::Authenticated { public_key, session } => {
            println!("Signed in as {}", public_key);
            println!("Session token ({}s): {}", session.expires_in, session.access_token);
            Ok(())
        }
        AttemptOutcome::Failed(reason) => bail!("Sign-in failed: {}", reason),
        other => bail!("Sign-in did not complete: {:?}", other),
    }
}
