//! Toxic Philosopher binary entry point

use std::net::SocketAddr;

use toxic_philosopher::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Load configuration from file and environment
/// 3. Initialize AppState
/// 4. Build Axum router
/// 5. Start background tasks (rate-limit sweep)
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("PHILOSOPHER__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "toxic_philosopher=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "toxic_philosopher=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Toxic Philosopher...");

    // 2. Initialize metrics
    toxic_philosopher::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        public_url = %config.server.base_url(),
        backend = ?config.storage.backend,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = toxic_philosopher::build_router(state.clone());

    // 6. Start background tasks
    spawn_rate_limit_sweep(state.clone());

    // 7. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Activation links point at {}", config.server.base_url());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Spawn the task that drops idle rate-limit windows
fn spawn_rate_limit_sweep(state: AppState) {
    let configured_interval_secs = state.config.rate_limit.sweep_interval_seconds;
    if configured_interval_secs == 0 {
        tracing::warn!("rate_limit.sweep_interval_seconds=0 is invalid; clamped to 1 second");
    }
    let interval_secs = configured_interval_secs.max(1);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        // The first tick fires immediately; nothing to sweep yet.
        interval.tick().await;

        loop {
            interval.tick().await;

            state.rate_limiter.prune().await;
        }
    });

    tracing::info!("Rate-limit sweep task spawned");
}
