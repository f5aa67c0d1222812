use shared::config::Config;
use std::sync::Arc;
use std::time::Duration;
use strata::{CacheService, LocalStore, TieredCache};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables before the filter reads RUST_LOG
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting Strata cache server");
    match dotenv {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Config::from_env();

    // ============================================
    // STEP 1: Remote tier (L2)
    // ============================================
    info!(endpoint = %config.remote.redacted_url(), "Connecting remote cache store");
    let adapter = storage_engine::connect_remote(&config.remote).await;
    let remote = Arc::new(CacheService::new(adapter));

    // ============================================
    // STEP 2: Local tier (L1)
    // ============================================
    let local = Arc::new(LocalStore::new(config.local.capacity, config.local.ttl));
    let _sweeper = local.spawn_sweeper(sweep_interval(config.local.ttl));
    info!(
        capacity = local.capacity(),
        ttl_secs = local.ttl().as_secs(),
        "Local cache ready"
    );

    let cache = Arc::new(TieredCache::new(local, remote));

    // ============================================
    // STEP 3: Status endpoints
    // ============================================
    let router = strata_server::build_router(strata_server::AppState::new(cache));
    let addr = format!("{}:{}", config.host, config.http_port);
    let listener = TcpListener::bind(&addr).await.inspect_err(|e| {
        error!("Failed to bind HTTP server on {}: {}", addr, e);
    })?;

    info!("HTTP Server listening on http://{}", addr);
    info!("Try: curl http://{}/health", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Strata server shutting down");
    Ok(())
}

/// Sweep a few times per L1 lifetime, but not more than once a second.
fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 4).max(Duration::from_secs(1))
}

// Graceful shutdown handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}
