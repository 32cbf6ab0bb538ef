//! Toxic Philosopher access gate
//!
//! Backend for the access-code workflow of "The Toxic Philosopher":
//! self-service applications verified from comment screenshots, code
//! issuance, activation links and redemption.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Access endpoints (apply, analyze, verify, check)         │
//! │  - Admin endpoints, Prometheus metrics                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Anti-abuse rules, code issuance, activation              │
//! │  - Screenshot verification, comment-time parsing            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - JSON files or Redis                                      │
//! │  - Screenshot files on local disk                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Business logic layer
//! - `verify`: Vision client, screenshot analysis, comment times
//! - `data`: Code and application stores
//! - `storage`: Screenshot files
//! - `auth`: Admin sessions
//! - `rate_limit`: Per-client sliding window
//! - `clock`: Injectable time source
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod service;
pub mod storage;
pub mod verify;

use std::sync::Arc;

use chrono::Utc;

use clock::{Clock, SystemClock};
use data::Stores;
use rate_limit::RateLimiter;
use service::{ActivationLinks, ActivationService, ApplyRules, ApplyService, CodeIssuer};
use storage::ScreenshotStore;
use verify::{CommentTimeValidator, OpenAiVisionClient, ScreenshotVerifier, VisionClient};

/// Application state shared across all handlers
///
/// Cloned for each request; every member is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    pub clock: Arc<dyn Clock>,

    /// Code table and application log
    pub stores: Stores,

    /// Per-client limiter for self-service applications
    pub rate_limiter: Arc<RateLimiter>,

    /// Vision-backed screenshot analysis
    pub verifier: Arc<ScreenshotVerifier>,

    /// Uploaded screenshot files
    pub screenshots: Arc<ScreenshotStore>,

    pub issuer: Arc<CodeIssuer>,

    pub apply: Arc<ApplyService>,

    pub activation: Arc<ActivationService>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Open the configured store backend
    /// 2. Build the vision client (if an API key is configured)
    /// 3. Wire services
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Stores
        let stores = Stores::open(&config.storage).await?;
        tracing::info!(backend = ?config.storage.backend, "Stores opened");

        // 2. Vision client
        let vision = OpenAiVisionClient::from_config(&config.vision)?
            .map(|client| Arc::new(client) as Arc<dyn VisionClient>);
        if vision.is_none() {
            tracing::warn!("vision.api_key is not set; screenshot analysis is disabled");
        }

        // 3. Services
        Self::from_parts(config, stores, Arc::new(SystemClock), vision).await
    }

    /// Wire services around already-built stores, clock and vision client.
    ///
    /// Integration tests use this to inject a manual clock and a scripted
    /// vision client.
    pub async fn from_parts(
        config: config::AppConfig,
        stores: Stores,
        clock: Arc<dyn Clock>,
        vision: Option<Arc<dyn VisionClient>>,
    ) -> Result<Self, error::AppError> {
        let access = &config.access;

        let rate_limiter = RateLimiter::with_max_tracked_keys(
            config.rate_limit.apply_max_requests,
            chrono::Duration::seconds(config.rate_limit.apply_window_seconds as i64),
            config.rate_limit.max_tracked_clients,
            clock.clone(),
        );

        let screenshots = ScreenshotStore::open(
            &config.storage.screenshot_dir,
            config.upload.max_screenshot_bytes,
            clock.clone(),
        )
        .await?;

        let issuer = Arc::new(CodeIssuer::new(
            stores.codes.clone(),
            clock.clone(),
            &access.code_prefix,
        ));

        let rules = ApplyRules::new(
            stores.codes.clone(),
            stores.applications.clone(),
            CommentTimeValidator::new(access.timezone_offset_hours, clock.clone())?,
            clock.clone(),
            access.min_comment_chars,
            access.max_comment_age_days,
        );
        let apply = ApplyService::new(
            rules,
            issuer.clone(),
            stores.applications.clone(),
            clock.clone(),
        );

        let links = ActivationLinks::new(config.server.base_url(), access.link_secret.clone());
        let activation = ActivationService::new(
            stores.codes.clone(),
            stores.applications.clone(),
            links,
            clock.clone(),
        );

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            clock,
            stores,
            rate_limiter: Arc::new(rate_limiter),
            verifier: Arc::new(ScreenshotVerifier::new(vision)),
            screenshots: Arc::new(screenshots),
            issuer,
            apply: Arc::new(apply),
            activation: Arc::new(activation),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`; the apply
/// endpoint keys its rate limit on the peer address.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::{Router, middleware, routing::get};
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config.server);

    let metrics = api::metrics_router::<AppState>().layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_admin,
    ));

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .merge(api::access_router(&state))
        .nest("/admin", api::admin_router());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .merge(metrics)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.base_url().starts_with("https://") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from public URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> axum::Json<api::HealthResponse> {
    axum::Json(api::HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}
