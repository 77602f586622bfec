//! The auth executor: `/auth/v1/*`.
//!
//! Thin adapters over the [`localbase_auth::AuthCore`] state machine.
//! With no mail or SMS gateway in a local install, flows that would
//! deliver a one-time token out of band return it in the response body
//! instead; `verify` consumes it exactly as the hosted platform would.

use crate::respond::AppError;
use crate::state::ProjectContext;
use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use localbase_auth::{
    AdminUserRequest, AuthError, FactorType, PasswordGrant, SignOutScope, SignUpRequest,
    UpdateUserRequest,
};
use localbase_core::{ApiError, Role, SessionContext};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

fn require_user(ctx: &SessionContext) -> Result<Uuid, AppError> {
    ctx.user_id.ok_or_else(|| AuthError::NotAuthenticated.into())
}

fn require_service(ctx: &SessionContext) -> Result<(), AppError> {
    if ctx.is_service_role() {
        return Ok(());
    }
    let status = if ctx.role == Role::Anon { 401 } else { 403 };
    Err(ApiError::auth(status, "forbidden", "this endpoint requires the service role").into())
}

fn current_session_id(ctx: &SessionContext) -> Option<Uuid> {
    ctx.claims
        .get("session_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn bad_body(e: impl std::fmt::Display) -> AppError {
    ApiError::validation("validation_failed", format!("invalid request body: {e}")).into()
}

// ---------------------------------------------------------------------
// Sign-up and token issuance
// ---------------------------------------------------------------------

pub async fn signup(
    Extension(project): Extension<ProjectContext>,
    Json(req): Json<SignUpRequest>,
) -> Result<Response, AppError> {
    let outcome = project.auth.sign_up(req).await?;
    let body = match outcome.session {
        Some(session) => serde_json::to_value(&session).map_err(bad_body)?,
        None => serde_json::to_value(&outcome.user).map_err(bad_body)?,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub grant_type: Option<String>,
}

pub async fn token(
    Extension(project): Extension<ProjectContext>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    match query.grant_type.as_deref() {
        Some("password") => {
            let grant: PasswordGrant = serde_json::from_value(body).map_err(bad_body)?;
            let session = project.auth.sign_in_password(grant).await?;
            Ok(Json(serde_json::to_value(&session).map_err(bad_body)?))
        }
        Some("refresh_token") => {
            let token = body
                .get("refresh_token")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let session = project.auth.refresh(token).await?;
            Ok(Json(serde_json::to_value(&session).map_err(bad_body)?))
        }
        other => Err(ApiError::validation(
            "unsupported_grant_type",
            format!("unsupported grant_type: {}", other.unwrap_or("<missing>")),
        )
        .into()),
    }
}

/// Legacy alias for the password grant.
pub async fn signin(
    project: Extension<ProjectContext>,
    Json(grant): Json<PasswordGrant>,
) -> Result<Json<Value>, AppError> {
    let session = project.auth.sign_in_password(grant).await?;
    Ok(Json(serde_json::to_value(&session).map_err(bad_body)?))
}

#[derive(Debug, Deserialize)]
pub struct LogoutQuery {
    pub scope: Option<String>,
}

pub async fn logout(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
    Query(query): Query<LogoutQuery>,
) -> Result<StatusCode, AppError> {
    let user_id = require_user(&ctx)?;
    let scope = SignOutScope::parse(query.scope.as_deref());
    project
        .auth
        .sign_out(user_id, current_session_id(&ctx), scope)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------
// Current user and session
// ---------------------------------------------------------------------

pub async fn get_user(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user(&ctx)?;
    let user = project.auth.get_user(user_id).await?;
    Ok(Json(serde_json::to_value(&user).map_err(bad_body)?))
}

pub async fn update_user(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user(&ctx)?;
    let user = project.auth.update_user(user_id, req).await?;
    Ok(Json(serde_json::to_value(&user).map_err(bad_body)?))
}

pub async fn get_session(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<Json<Value>, AppError> {
    let Some(session_id) = current_session_id(&ctx) else {
        return Ok(Json(Value::Null));
    };
    let session = project.auth.current_session(session_id).await?;
    Ok(Json(serde_json::to_value(&session).map_err(bad_body)?))
}

// ---------------------------------------------------------------------
// One-time-token flows
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RecoverBody {
    pub email: String,
}

pub async fn recover(
    Extension(project): Extension<ProjectContext>,
    Json(body): Json<RecoverBody>,
) -> Result<Json<Value>, AppError> {
    let token = project.auth.recover(&body.email).await?;
    Ok(Json(json!({ "recovery_token": token })))
}

#[derive(Debug, Deserialize)]
pub struct OtpBody {
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default = "default_true")]
    pub create_user: bool,
}

fn default_true() -> bool {
    true
}

pub async fn otp(
    Extension(project): Extension<ProjectContext>,
    Json(body): Json<OtpBody>,
) -> Result<Json<Value>, AppError> {
    let token = project
        .auth
        .send_otp(body.email.as_deref(), body.phone.as_deref(), body.create_user)
        .await?;
    Ok(Json(json!({ "otp_token": token })))
}

#[derive(Debug, Deserialize)]
pub struct MagiclinkBody {
    pub email: String,
}

pub async fn magiclink(
    Extension(project): Extension<ProjectContext>,
    Json(body): Json<MagiclinkBody>,
) -> Result<Json<Value>, AppError> {
    let token = project
        .auth
        .send_otp(Some(&body.email), None, true)
        .await?;
    Ok(Json(json!({ "magiclink_token": token })))
}

#[derive(Debug, Deserialize)]
pub struct ResendBody {
    pub email: Option<String>,
    pub phone: Option<String>,
}

pub async fn resend(
    Extension(project): Extension<ProjectContext>,
    Json(body): Json<ResendBody>,
) -> Result<Json<Value>, AppError> {
    let token = project
        .auth
        .resend(body.email.as_deref(), body.phone.as_deref())
        .await?;
    Ok(Json(json!({ "otp_token": token })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub token: String,
}

pub async fn verify(
    Extension(project): Extension<ProjectContext>,
    Json(body): Json<VerifyBody>,
) -> Result<Json<Value>, AppError> {
    let session = project.auth.verify(&body.kind, &body.token).await?;
    Ok(Json(serde_json::to_value(&session).map_err(bad_body)?))
}

// ---------------------------------------------------------------------
// MFA
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EnrollBody {
    pub factor_type: FactorType,
    pub friendly_name: Option<String>,
    pub phone: Option<String>,
}

pub async fn enroll_factor(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
    Json(body): Json<EnrollBody>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user(&ctx)?;
    let outcome = project
        .auth
        .enroll_factor(user_id, body.factor_type, body.friendly_name, body.phone)
        .await?;
    let mut response = json!({
        "id": outcome.factor.id,
        "type": outcome.factor.factor_type,
        "friendly_name": outcome.factor.friendly_name,
        "status": outcome.factor.status,
    });
    if let (Some(secret), Some(uri)) = (outcome.totp_secret, outcome.totp_uri) {
        response["totp"] = json!({ "secret": secret, "uri": uri });
    }
    if let Some(phone) = &outcome.factor.phone {
        response["phone"] = json!(phone);
    }
    Ok(Json(response))
}

pub async fn list_factors(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user(&ctx)?;
    let factors = project.auth.list_factors(user_id).await?;
    Ok(Json(serde_json::to_value(&factors).map_err(bad_body)?))
}

pub async fn delete_factor(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
    Path(factor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user(&ctx)?;
    project.auth.delete_factor(user_id, factor_id).await?;
    Ok(Json(json!({ "id": factor_id })))
}

pub async fn challenge_factor(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
    Path(factor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user(&ctx)?;
    let outcome = project.auth.challenge_factor(user_id, factor_id).await?;
    let mut response = json!({
        "id": outcome.challenge.id,
        "expires_at": outcome.expires_at.timestamp(),
    });
    if let Some(code) = outcome.sms_code {
        response["sms_code"] = json!(code);
    }
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct VerifyFactorBody {
    pub challenge_id: Option<Uuid>,
    pub code: String,
}

pub async fn verify_factor(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
    Path(factor_id): Path<Uuid>,
    Json(body): Json<VerifyFactorBody>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user(&ctx)?;
    let factor = project
        .auth
        .verify_factor(user_id, factor_id, body.challenge_id, &body.code)
        .await?;
    Ok(Json(serde_json::to_value(&factor).map_err(bad_body)?))
}

// ---------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AdminListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    50
}

pub async fn admin_list_users(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<Value>, AppError> {
    require_service(&ctx)?;
    let (users, total) = project
        .auth
        .admin_list_users(query.page, query.per_page)
        .await?;
    Ok(Json(json!({
        "users": users,
        "aud": "authenticated",
        "total": total,
    })))
}

pub async fn admin_create_user(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
    Json(req): Json<AdminUserRequest>,
) -> Result<Response, AppError> {
    require_service(&ctx)?;
    let user = project.auth.admin_create_user(req).await?;
    let body = serde_json::to_value(&user).map_err(bad_body)?;
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn admin_get_user(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_service(&ctx)?;
    let user = project.auth.get_user(user_id).await?;
    Ok(Json(serde_json::to_value(&user).map_err(bad_body)?))
}

pub async fn admin_update_user(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AdminUserRequest>,
) -> Result<Json<Value>, AppError> {
    require_service(&ctx)?;
    let user = project.auth.admin_update_user(user_id, req).await?;
    Ok(Json(serde_json::to_value(&user).map_err(bad_body)?))
}

pub async fn admin_delete_user(
    Extension(project): Extension<ProjectContext>,
    Extension(ctx): Extension<SessionContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_service(&ctx)?;
    project.auth.admin_delete_user(user_id).await?;
    Ok(Json(json!({})))
}

// ---------------------------------------------------------------------
// Key discovery
// ---------------------------------------------------------------------

pub async fn jwks(
    Extension(project): Extension<ProjectContext>,
) -> Json<Value> {
    Json(project.auth.jwt().jwks())
}
