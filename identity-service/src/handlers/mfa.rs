use axum::extract::State;
use axum::Json;
use common_audit::{AuditActor, AuditSeverity};
use common_db::{TenantContext, UnitOfWork};
use common_http_errors::ApiError;
use common_auth::AuthContext;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app::AppState;
use crate::mfa::{build_otpauth_uri, generate_totp_secret, normalize_mfa_code, verify_totp_code};
use crate::repo::user_repo;

#[derive(Serialize)]
pub struct MfaEnrollResponse {
    pub secret: String,
    pub otpauth_uri: String,
}

#[derive(Deserialize)]
pub struct MfaVerifyRequest {
    pub code: String,
}

fn actor(auth: &AuthContext) -> AuditActor {
    AuditActor {
        id: Some(auth.claims.subject),
        name: None,
        email: auth.claims.email.clone(),
    }
}

/// Stages a new TOTP secret for the caller's own account. The secret only
/// becomes active once confirmed via `verify`, so a half-finished enrollment
/// never locks a user out of their existing credentials.
pub async fn enroll(
    auth: AuthContext,
    State(state): State<AppState>,
) -> Result<Json<MfaEnrollResponse>, ApiError> {
    let tenant = TenantContext::new(auth.claims.tenant_id)
        .with_user(auth.claims.subject)
        .with_roles(auth.claims.roles.clone());
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;

    let mut user = user_repo::get_by_id(uow.conn(), uow.tenant(), auth.claims.subject)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;

    let secret = generate_totp_secret();
    user.begin_mfa_enrollment(secret.clone());
    user_repo::update(uow.conn(), &user).await?;

    state
        .audit
        .emit(
            Some(user.organization_id),
            actor(&auth),
            "User",
            Some(user.id),
            "mfa.enroll.started",
            AuditSeverity::Info,
            None,
            json!({}),
            json!({}),
        )
        .await;
    uow.commit().await?;
    state.metrics.mfa_event("enroll_started");

    let otpauth_uri = build_otpauth_uri(&state.config.mfa_issuer, user.email.as_str(), &secret);
    Ok(Json(MfaEnrollResponse { secret, otpauth_uri }))
}

/// Confirms a pending enrollment by checking a live code against the staged
/// secret, activating it as the account's MFA secret.
pub async fn verify(
    auth: AuthContext,
    State(state): State<AppState>,
    Json(req): Json<MfaVerifyRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    let tenant = TenantContext::new(auth.claims.tenant_id)
        .with_user(auth.claims.subject)
        .with_roles(auth.claims.roles.clone());
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;

    let mut user = user_repo::get_by_id(uow.conn(), uow.tenant(), auth.claims.subject)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;

    let pending = user
        .mfa_pending_secret
        .clone()
        .ok_or(ApiError::bad_request("mfa_enrollment_not_started", None))?;

    let code = normalize_mfa_code(&req.code).ok_or(ApiError::bad_request("mfa_code_invalid", None))?;
    if !verify_totp_code(&pending, &code) {
        state.metrics.mfa_event("enroll_verify_failed");
        return Err(ApiError::Unauthorized {
            message: Some("mfa_invalid".to_string()),
            trace_id: None,
        });
    }

    user.confirm_mfa_enrollment().map_err(|err| ApiError::internal(err, None))?;
    user_repo::update(uow.conn(), &user).await?;

    state
        .audit
        .emit(
            Some(user.organization_id),
            actor(&auth),
            "User",
            Some(user.id),
            "mfa.enroll.confirmed",
            AuditSeverity::Info,
            None,
            json!({}),
            json!({}),
        )
        .await;
    uow.commit().await?;
    state.metrics.mfa_event("enroll_confirmed");
    Ok(axum::http::StatusCode::OK)
}
