mod config;
mod error;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use routes::{app_router, AppState};
use tasknest_core::gateway::HttpUpstream;
use tasknest_core::LocalStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tasknest=info,tower_http=info")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting tasknest-gateway with config: {:?}", config);

    let store = LocalStore::open_path(&config.db_path).await?;
    let upstream = HttpUpstream::new(config.upstream_timeout)?;
    let state = AppState::new(Arc::clone(&config), store, upstream)?;

    let _event_log = state
        .host()
        .events()
        .subscribe(|event| tracing::info!("Gateway event: {event:?}"));

    match state.install_configured_version().await {
        Ok(lifecycle) => tracing::info!(
            "Gateway {} is {lifecycle:?}",
            config.gateway.cache_version
        ),
        // The proxy still forwards requests while no version is active.
        Err(error) => tracing::warn!("Initial install failed: {error}"),
    }
    state.watch_sync_requests();

    let bind_addr = config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("tasknest-gateway listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
