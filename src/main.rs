//! Chat Relay - Binary Entry Point
//!
//! Connects to Redis, starts one relay instance and serves it over HTTP
//! until Ctrl-C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use chat_relay::api::http::create_router;
use chat_relay::api::websocket::AppState;
use chat_relay::backend::RedisBackend;
use chat_relay::config::Config;
use chat_relay::relay::RelayInstance;
use chat_relay::types::RelayResult;

const DEFAULT_LOG_FILTER: &str = "chat_relay=info,relay_server=info";

#[tokio::main]
async fn main() -> RelayResult<()> {
    let config = Config::load();

    init_tracing(config.json_logs);

    tracing::info!("Chat relay v{} starting", chat_relay::VERSION);

    // Missing store URL is fatal before any connection is accepted
    let redis_url = config.resolve_redis_url()?;
    let backend = Arc::new(RedisBackend::connect(&redis_url).await?);

    let instance = Arc::new(
        RelayInstance::start(backend.clone(), backend, config.instance_options()).await?,
    );

    let state = Arc::new(
        AppState::new(instance.clone(), config.port)
            .with_heartbeat(config.heartbeat())
            .with_cors_origin(config.cors_origin.clone()),
    );
    let app = create_router(state);

    let listener = TcpListener::bind(config.bind_address()).await?;
    tracing::info!(origin = %instance.origin_tag(), "Server started at http://{}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(instance, config.shutdown_grace()))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}

/// Resolves once the instance has reconciled its connections, or the grace period ran out
async fn shutdown(instance: Arc<RelayInstance>, grace: Duration) {
    wait_for_signal().await;
    tracing::info!("Shutdown signal received");

    if tokio::time::timeout(grace, instance.shutdown()).await.is_err() {
        tracing::warn!(grace_ms = grace.as_millis() as u64, "Shutdown reconciliation timed out");
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
