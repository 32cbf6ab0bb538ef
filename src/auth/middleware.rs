//! Authentication middleware
//!
//! Protects admin routes.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, State},
    http::{HeaderMap, Request, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use super::session::{AdminSession, verify_session_token};
use crate::AppState;
use crate::error::AppError;

/// Value of the `Authorization` header with an optional `Bearer ` prefix removed
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn authenticate(token: &str, state: &AppState) -> Result<AdminSession, AppError> {
    verify_session_token(
        token,
        &state.config.admin.session_secret,
        state.clock.now(),
    )
}

/// Middleware to require an admin session
///
/// Adds the session to request extensions if valid.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/metrics", ...)
///     .layer(middleware::from_fn_with_state(state, require_admin));
/// ```
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers()).ok_or(AppError::Unauthorized)?;
    let session = authenticate(&token, &state)?;

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Extractor for an authenticated admin
///
/// # Usage
/// ```ignore
/// async fn handler(AdminUser(session): AdminUser) -> impl IntoResponse {
///     format!("Session expires at {}", session.expires_at)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AdminUser(pub AdminSession);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<AdminSession>().cloned() {
            return Ok(AdminUser(session));
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::Unauthorized)?;

        let app_state = AppState::from_ref(state);
        let session = authenticate(bearer.token(), &app_state)?;
        parts.extensions.insert(session.clone());

        Ok(AdminUser(session))
    }
}
