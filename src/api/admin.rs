//! Admin API endpoints
//!
//! Password login plus read-only views over codes and applications, and
//! batch issuance. Everything but login requires an admin session.

use axum::{
    Router,
    extract::{Query, State},
    response::Json,
    routing::{get, post},
};

use super::dto::{
    ApplicationListResponse, BatchRequest, BatchResponse, CodeListResponse, IssuedCode,
    LoginRequest, LoginResponse, StatsResponse,
};
use crate::AppState;
use crate::auth::{AdminSession, AdminUser, create_session_token, password_matches};
use crate::data::{ApplicationQuery, CodeQuery};
use crate::error::AppError;
use crate::service::BatchUser;

const RECENT_APPLICATIONS: usize = 10;
const DEFAULT_BATCH_NOTE: &str = "batch issue";
const MAX_BATCH_SIZE: usize = 1000;

/// Create admin router
///
/// Routes:
/// - POST /login - Exchange the admin password for a session token
/// - GET /stats - Code counters and recent applications
/// - GET /codes - List codes
/// - GET /applications - List applications
/// - POST /codes/batch - Issue codes for a list of users
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/stats", get(stats))
        .route("/codes", get(list_codes))
        .route("/applications", get(list_applications))
        .route("/codes/batch", post(issue_batch))
}

/// POST /api/admin/login
async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let admin = &state.config.admin;
    if !password_matches(&request.password, &admin.password) {
        tracing::warn!("Admin login failed");
        return Err(AppError::Unauthorized);
    }

    let session = AdminSession::new(state.clock.now(), admin.session_max_age);
    let token = create_session_token(&session, &admin.session_secret)?;
    tracing::info!(expires_at = %session.expires_at, "Admin logged in");

    Ok(Json(LoginResponse {
        success: true,
        token,
        expires_at: session.expires_at,
        message: "login successful".to_string(),
    }))
}

/// GET /api/admin/stats
async fn stats(
    State(state): State<AppState>,
    AdminUser(_session): AdminUser,
) -> Result<Json<StatsResponse>, AppError> {
    let stats = state.stores.codes.stats().await?;
    let recent_applications = state
        .stores
        .applications
        .recent(RECENT_APPLICATIONS)
        .await?;

    Ok(Json(StatsResponse {
        stats,
        recent_applications,
    }))
}

/// GET /api/admin/codes?status&source&page&limit
async fn list_codes(
    State(state): State<AppState>,
    AdminUser(_session): AdminUser,
    Query(query): Query<CodeQuery>,
) -> Result<Json<CodeListResponse>, AppError> {
    let page = state.stores.codes.list(&query).await?;

    Ok(Json(CodeListResponse {
        codes: page.items,
        total: page.total,
        page: page.page,
        pages: page.pages,
    }))
}

/// GET /api/admin/applications?status&page&limit
async fn list_applications(
    State(state): State<AppState>,
    AdminUser(_session): AdminUser,
    Query(query): Query<ApplicationQuery>,
) -> Result<Json<ApplicationListResponse>, AppError> {
    let page = state.stores.applications.list(&query).await?;

    Ok(Json(ApplicationListResponse {
        applications: page.items,
        total: page.total,
        page: page.page,
        pages: page.pages,
    }))
}

/// POST /api/admin/codes/batch
///
/// Users without a `userId` get their `userName` as id.
async fn issue_batch(
    State(state): State<AppState>,
    AdminUser(_session): AdminUser,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    let users: Vec<BatchUser> = request
        .users
        .into_iter()
        .filter_map(|user| {
            let user_name = user.user_name.trim().to_string();
            if user_name.is_empty() {
                return None;
            }
            let user_id = user
                .user_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| user_name.clone());
            Some(BatchUser { user_name, user_id })
        })
        .collect();

    if users.is_empty() {
        return Err(AppError::Validation("user list is empty".to_string()));
    }
    if users.len() > MAX_BATCH_SIZE {
        return Err(AppError::Validation(format!(
            "at most {} users per batch",
            MAX_BATCH_SIZE
        )));
    }

    let note = request
        .note
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_BATCH_NOTE.to_string());

    let minted = state.issuer.issue_batch(&users, Some(note)).await?;
    let links = state.activation.links();

    let codes = minted
        .into_iter()
        .map(|code| {
            Ok(IssuedCode {
                link: links.link(&code.code)?,
                id: code.id,
                user_name: code.user_name,
                user_id: code.user_id,
                code: code.code,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(Json(BatchResponse {
        success: true,
        count: codes.len(),
        codes,
    }))
}
