use gubuy_portal_auth::prelude::*;
use std::env;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "invalid GUB.UY configuration");
        std::process::exit(1);
    });
    tracing::info!(issuer = %config.issuer, client_id = %config.client_id, "loaded GUB.UY configuration");

    let auth = Authenticator::new(config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to build the authenticator");
        std::process::exit(1);
    });

    let listen = env::var("PORTAL_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
    let addr: SocketAddr = listen.parse().unwrap_or_else(|e| {
        tracing::error!(error = %e, "PORTAL_LISTEN_ADDR is not a socket address: {listen}");
        std::process::exit(1);
    });

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to bind on {addr}");
        std::process::exit(1);
    });
    tracing::info!("listening on {addr}");

    let app = router(auth);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
