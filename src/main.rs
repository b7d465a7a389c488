//! Wallet Sign-In Server
//!
//! Serves the nonce, verify and session endpoints for wallet sign-in.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;

use wallet_signin_server::auth::{purge_expired_task, MemoryNonceStore, NonceIssuer, PgNonceStore};
use wallet_signin_server::config::Config;
use wallet_signin_server::state::AppState;
use wallet_signin_server::{auth_service_from_config, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        domain = %config.signin_domain,
        "Starting wallet sign-in server"
    );

    let nonce_ttl = Duration::seconds(config.auth_nonce_ttl_seconds);
    let nonces: Arc<dyn NonceIssuer> = match &config.database_url {
        Some(database_url) => {
            tracing::info!(
                database = ?config.database_url_masked(),
                "Connecting to database..."
            );
            let db_pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;

            let store = PgNonceStore::new(db_pool, nonce_ttl);
            store
                .ensure_schema()
                .await
                .context("Failed to prepare nonce table")?;
            tracing::info!("Database connected successfully");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory nonce store");
            Arc::new(MemoryNonceStore::new(
                nonce_ttl,
                config.auth_nonce_max_outstanding,
            ))
        }
    };

    // Start nonce purge task in background
    let purge_interval = std::time::Duration::from_secs(config.nonce_purge_interval_seconds.max(1));
    tokio::spawn(purge_expired_task(nonces.clone(), purge_interval));

    let auth_service = Arc::new(auth_service_from_config(&config, nonces));
    let app = routes::app_router(
        AppState::new(auth_service),
        config.cors_allowed_origins.as_deref(),
    );

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // Serve with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
