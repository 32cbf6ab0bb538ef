//! Access-code endpoints
//!
//! Self-service application, screenshot analysis, code and link
//! verification, and the permission check used by the web client.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    Router,
    extract::{ConnectInfo, DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tower_http::limit::RequestBodyLimitLayer;

use super::dto::{
    AnalyzeResponse, ApplyResponse, CheckAccessResponse, VerifiedCode, VerifyCodeRequest,
    VerifyResponse, VerifyTokenRequest,
};
use crate::AppState;
use crate::auth::bearer_token;
use crate::error::AppError;
use crate::metrics::RATE_LIMITED_TOTAL;
use crate::service::{ApplyInput, ApplyOutcome, Claim, MSG_INVALID_LINK, Verification};
use crate::storage::extension_for;

const MSG_INCOMPLETE: &str = "please fill in all fields and upload a comment screenshot";
const MSG_ISSUED: &str = "application approved, your access code is ready";
const MSG_REISSUED: &str = "you already have an unused access code for this comment";
const MSG_NOT_A_COMMENT: &str = "please upload a comment screenshot";
const MSG_MISSING_SCREENSHOT: &str = "please upload a screenshot";
const MSG_MISSING_CODE: &str = "please enter an access code";

/// Multipart allowance on top of the screenshot itself
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Create access router
///
/// Routes:
/// - POST /apply-code
/// - POST /analyze-screenshot
/// - POST /verify-code
/// - POST /verify-token
/// - GET /check-access
pub fn access_router(state: &AppState) -> Router<AppState> {
    let upload_limit = state.screenshots.max_bytes() + FORM_OVERHEAD_BYTES;

    Router::new()
        .route("/apply-code", post(apply_code))
        .route("/analyze-screenshot", post(analyze_screenshot))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(RequestBodyLimitLayer::new(upload_limit))
        .route("/verify-code", post(verify_code))
        .route("/verify-token", post(verify_token))
        .route("/check-access", get(check_access))
}

// =============================================================================
// Multipart
// =============================================================================

struct Upload {
    bytes: Vec<u8>,
    content_type: String,
}

/// Text fields plus the `screenshot` file of a form
#[derive(Default)]
struct ScreenshotForm {
    fields: HashMap<String, String>,
    screenshot: Option<Upload>,
}

impl ScreenshotForm {
    /// Trimmed, non-empty text field
    fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

async fn read_form(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<ScreenshotForm, AppError> {
    let mut form = ScreenshotForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to parse multipart: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        if name == "screenshot" {
            let content_type = field.content_type().unwrap_or("").to_string();
            if extension_for(&content_type).is_none() {
                return Err(AppError::Validation(
                    "only JPG, PNG, GIF and WEBP images are supported".to_string(),
                ));
            }

            let mut bytes = Vec::new();
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| AppError::Validation(format!("Failed to read file: {}", e)))?
            {
                if bytes.len() + chunk.len() > max_bytes {
                    return Err(AppError::Validation(format!(
                        "screenshot exceeds {} MB",
                        max_bytes / (1024 * 1024)
                    )));
                }
                bytes.extend_from_slice(&chunk);
            }

            form.screenshot = Some(Upload {
                bytes,
                content_type,
            });
        } else if !name.is_empty() {
            let value = field
                .text()
                .await
                .map_err(|e| AppError::Validation(format!("Failed to read {}: {}", name, e)))?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}

/// Rate-limit key for a request
fn client_key(peer: SocketAddr, headers: &HeaderMap, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(client) = forwarded {
            return client.to_string();
        }
    }
    peer.ip().to_string()
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /api/apply-code
///
/// Multipart fields: `userName`, `screenshot`, `extractedName`, `comment`,
/// optional `commentTime` and `confidence`.
async fn apply_code(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let client = client_key(peer, &headers, state.config.server.trust_forwarded_for);
    tracing::debug!(client = %client, "Apply request");
    if let Err(error) = state.rate_limiter.check(&client).await {
        tracing::warn!(client = %client, "Apply rate limit exceeded");
        RATE_LIMITED_TOTAL.with_label_values(&["apply-code"]).inc();
        return Err(error);
    }

    let form = read_form(multipart, state.screenshots.max_bytes()).await?;
    let (Some(user_name), Some(extracted_name), Some(comment), Some(upload)) = (
        form.text("userName"),
        form.text("extractedName"),
        form.text("comment"),
        form.screenshot.as_ref(),
    ) else {
        return Err(AppError::Validation(MSG_INCOMPLETE.to_string()));
    };
    let confidence = form
        .text("confidence")
        .and_then(|c| c.parse::<f64>().ok())
        .filter(|c| (0.0..=1.0).contains(c));

    let screenshot = state
        .screenshots
        .save(&upload.bytes, &upload.content_type)
        .await?;

    let input = ApplyInput {
        claim: Claim {
            user_name,
            extracted_name,
            comment,
            comment_time: form.text("commentTime"),
        },
        screenshot: screenshot.clone(),
        confidence,
    };

    let outcome = match state.apply.apply(input).await {
        Ok(outcome) => outcome,
        Err(error) => {
            if let Err(cleanup) = state.screenshots.remove(&screenshot).await {
                tracing::warn!(
                    error = %cleanup,
                    file = %screenshot,
                    "Failed to remove screenshot"
                );
            }
            return Err(error);
        }
    };

    let response = match outcome {
        ApplyOutcome::Issued(code) => (
            StatusCode::OK,
            Json(ApplyResponse {
                success: true,
                code: Some(code.code),
                message: MSG_ISSUED.to_string(),
                reason: None,
            }),
        ),
        ApplyOutcome::Reissued(code) => (
            StatusCode::OK,
            Json(ApplyResponse {
                success: true,
                code: Some(code.code),
                message: MSG_REISSUED.to_string(),
                reason: None,
            }),
        ),
        ApplyOutcome::Rejected(rejection) => (
            rejection.status(),
            Json(ApplyResponse {
                success: false,
                code: None,
                message: rejection.reason.clone(),
                reason: Some(rejection.kind.as_str()),
            }),
        ),
    };

    Ok(response.into_response())
}

/// POST /api/analyze-screenshot
///
/// Multipart fields: `screenshot`, optional `expectedName`. Nothing is
/// stored.
async fn analyze_screenshot(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let form = read_form(multipart, state.screenshots.max_bytes()).await?;
    let upload = form
        .screenshot
        .as_ref()
        .filter(|u| !u.bytes.is_empty())
        .ok_or_else(|| AppError::Validation(MSG_MISSING_SCREENSHOT.to_string()))?;
    let expected_name = form.text("expectedName");

    let analysis = state
        .verifier
        .analyze(&upload.bytes, &upload.content_type, expected_name.as_deref())
        .await?;

    if !analysis.is_comment_image {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "message": MSG_NOT_A_COMMENT,
            })),
        )
            .into_response());
    }

    Ok(Json(AnalyzeResponse {
        success: true,
        extracted_name: analysis.extracted_name,
        comment: analysis.comment,
        comment_time: analysis.comment_time,
        confidence: analysis.confidence,
    })
    .into_response())
}

/// Render a verification the way verify-code and verify-token answer
fn verification_response(result: Result<Verification, AppError>, with_code: bool) -> Response {
    match result {
        Ok(verification) if verification.valid => {
            let code = verification.code.as_ref();
            Json(VerifyResponse {
                valid: true,
                code: code.filter(|_| with_code).map(|c| c.code.clone()),
                message: verification.message.to_string(),
                data: code.map(VerifiedCode::from),
            })
            .into_response()
        }
        Ok(verification) => Json(VerifyResponse::invalid(verification.message)).into_response(),
        Err(error) => {
            error.record();
            (
                error.status_code(),
                Json(VerifyResponse::invalid(error.public_message())),
            )
                .into_response()
        }
    }
}

/// POST /api/verify-code
///
/// Redeems the code on success.
async fn verify_code(
    State(state): State<AppState>,
    Json(request): Json<VerifyCodeRequest>,
) -> Response {
    let Some(code) = request.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(VerifyResponse::invalid(MSG_MISSING_CODE)),
        )
            .into_response();
    };

    verification_response(state.activation.redeem(code).await, false)
}

/// POST /api/verify-token
///
/// Decodes an activation link token and redeems the code inside.
async fn verify_token(
    State(state): State<AppState>,
    Json(request): Json<VerifyTokenRequest>,
) -> Response {
    let Some(token) = request.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(VerifyResponse::invalid(MSG_INVALID_LINK)),
        )
            .into_response();
    };

    verification_response(state.activation.redeem_token(token).await, true)
}

/// GET /api/check-access
///
/// `Authorization: Bearer <code>`. Never consumes the code; any failure
/// reads as no access.
async fn check_access(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<CheckAccessResponse> {
    let Some(code) = bearer_token(&headers) else {
        return Json(CheckAccessResponse::default());
    };

    match state.activation.has_access(&code).await {
        Ok(Some(code)) => Json(CheckAccessResponse {
            has_access: true,
            code: Some(code.code),
            user_name: Some(code.user_name),
        }),
        Ok(None) => Json(CheckAccessResponse::default()),
        Err(error) => {
            error.record();
            Json(CheckAccessResponse::default())
        }
    }
}
