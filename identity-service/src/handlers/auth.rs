use axum::extract::State;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use common_audit::AuditSeverity;
use common_db::{TenantContext, UnitOfWork};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::config::AppConfig;
use crate::domain::email::Email;
use crate::domain::events::{EmailVerified, PasswordResetCompleted, PasswordResetRequested};
use crate::domain::password::PasswordHash;
use crate::domain::refresh_token;
use crate::domain::single_use_token::{self, SingleUseTokenKind, TokenVerifyOutcome};
use crate::domain::user::User;
use crate::mfa::{normalize_mfa_code, verify_totp_code};
use crate::notifications::MfaActivityEvent;
use crate::repo::{refresh_token_repo, role_repo, single_use_token_repo, user_repo};
use crate::tokens::TokenSubject;

fn user_actor(user: &User) -> common_audit::AuditActor {
    common_audit::AuditActor {
        id: Some(user.id),
        name: None,
        email: Some(user.email.as_str().to_string()),
    }
}

/// Builds the MFA-activity side-channel event for a login-path security
/// concern (lockout or failed MFA challenge); all three call sites in
/// `login` share this shape, differing only in `action`.
fn lockout_activity_event(user: &User, trace_id: Uuid, action: &'static str) -> MfaActivityEvent {
    MfaActivityEvent {
        action,
        severity: "warn",
        tenant_id: user.organization_id,
        user_id: Some(user.id),
        trace_id,
        occurred_at: Utc::now(),
        role: None,
        detail: Some(user.email.as_str().to_string()),
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub mfa_code: Option<String>,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
}

#[derive(Deserialize)]
pub struct RequestPasswordResetRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ConfirmPasswordResetRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct RequestEmailVerificationRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ConfirmEmailVerificationRequest {
    pub token: String,
}

struct RequestMetadata {
    ip: Option<String>,
    user_agent: Option<String>,
}

impl RequestMetadata {
    fn from_headers(headers: &HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .or_else(|| headers.get("x-real-ip"))
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| raw.split(',').next().map(|part| part.trim().to_string()))
            .filter(|value| !value.is_empty());

        let user_agent = headers
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Self { ip, user_agent }
    }
}

fn build_refresh_cookie(config: &AppConfig, token: &str, max_age_seconds: i64) -> String {
    let mut parts = vec![format!("{}={}", config.refresh_cookie_name, token), "Path=/".to_string(), "HttpOnly".to_string()];

    let max_age = max_age_seconds.max(0);
    parts.push(format!("Max-Age={max_age}"));
    if max_age > 0 {
        let expires = (Utc::now() + Duration::seconds(max_age)).to_rfc2822();
        parts.push(format!("Expires={expires}"));
    }
    if let Some(domain) = &config.refresh_cookie_domain {
        if !domain.is_empty() {
            parts.push(format!("Domain={domain}"));
        }
    }
    parts.push(format!("SameSite={}", config.refresh_cookie_same_site.as_str()));
    if config.refresh_cookie_secure {
        parts.push("Secure".to_string());
    }
    parts.join("; ")
}

fn clear_refresh_cookie(config: &AppConfig) -> String {
    let mut parts = vec![
        format!("{}=", config.refresh_cookie_name),
        "Path=/".to_string(),
        "Max-Age=0".to_string(),
        "Expires=Thu, 01 Jan 1970 00:00:00 GMT".to_string(),
        "HttpOnly".to_string(),
    ];
    parts.push(format!("SameSite={}", config.refresh_cookie_same_site.as_str()));
    if let Some(domain) = &config.refresh_cookie_domain {
        if !domain.is_empty() {
            parts.push(format!("Domain={domain}"));
        }
    }
    if config.refresh_cookie_secure {
        parts.push("Secure".to_string());
    }
    parts.join("; ")
}

fn extract_refresh_cookie(headers: &HeaderMap, config: &AppConfig) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    let prefix = format!("{}=", config.refresh_cookie_name);
    raw.split(';')
        .map(|segment| segment.trim())
        .find_map(|segment| segment.strip_prefix(&prefix))
        .map(|value| value.to_string())
}

fn append_cookie(response: &mut Response, cookie: &str) -> Result<(), ApiError> {
    let value = HeaderValue::from_str(cookie)
        .map_err(|err| ApiError::internal(format!("failed to encode cookie: {err}"), None))?;
    response.headers_mut().append(SET_COOKIE, value);
    Ok(())
}

/// A bypass tenant context used only for the handful of lookups that must
/// cross tenant boundaries by construction (login-by-email, refresh-token
/// rotation): the row itself carries no `organization_id`, so there is
/// nothing to scope against until after it is found.
fn admin_bypass_context() -> TenantContext {
    TenantContext::new(Uuid::nil()).with_roles(vec!["system".to_string()])
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let trace_id = Uuid::new_v4();
    let metadata = RequestMetadata::from_headers(&headers);
    state.metrics.login_attempt("attempt");

    let email = match Email::parse(&req.email) {
        Ok(email) => email,
        Err(_) => {
            state.metrics.login_attempt("invalid_credentials");
            return Err(ApiError::InvalidCredentials { trace_id: Some(trace_id) });
        }
    };

    let mut lookup_conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, Some(trace_id)))?;
    let found = user_repo::get_by_email_global(&mut lookup_conn, &email).await?;
    drop(lookup_conn);

    let mut user = match found {
        Some(user) => user,
        None => {
            state.metrics.login_attempt("invalid_credentials");
            return Err(ApiError::InvalidCredentials { trace_id: Some(trace_id) });
        }
    };

    let tenant = TenantContext::new(user.organization_id).with_user(user.id);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;

    let now = Utc::now();
    if user.is_locked(now) {
        state
            .audit
            .emit(
                Some(user.organization_id),
                user_actor(&user),
                "User",
                Some(user.id),
                "login.locked",
                AuditSeverity::Warn,
                Some(trace_id),
                json!({}),
                json!({ "ip": metadata.ip, "user_agent": metadata.user_agent }),
            )
            .await;
        state.metrics.login_attempt("account_locked");
        state
            .emit_mfa_activity(
                lockout_activity_event(&user, trace_id, "account.locked"),
                Some(format!("Login attempted against a locked account: {}", user.email.as_str())),
            )
            .await;
        return Err(ApiError::AccountLocked {
            locked_until: user.locked_until,
            trace_id: Some(trace_id),
        });
    }

    if !user.password_hash.verify(&req.password) {
        let just_locked = user.record_login_failure();
        user_repo::update(uow.conn(), &user).await?;
        uow.track_events(user.drain_events());
        state
            .audit
            .emit(
                Some(user.organization_id),
                user_actor(&user),
                "User",
                Some(user.id),
                "login.failed",
                AuditSeverity::Warn,
                Some(trace_id),
                json!({}),
                json!({ "ip": metadata.ip, "user_agent": metadata.user_agent }),
            )
            .await;
        uow.commit().await?;

        if just_locked {
            state.metrics.login_attempt("account_locked");
            state
                .emit_mfa_activity(
                    lockout_activity_event(&user, trace_id, "account.lockout_triggered"),
                    Some(format!("Account locked after repeated failed logins: {}", user.email.as_str())),
                )
                .await;
            return Err(ApiError::AccountLocked {
                locked_until: user.locked_until,
                trace_id: Some(trace_id),
            });
        }
        state.metrics.login_attempt("invalid_credentials");
        return Err(ApiError::InvalidCredentials { trace_id: Some(trace_id) });
    }

    let role_names: Vec<String> = role_repo::roles_for_user(uow.conn(), user.id)
        .await?
        .into_iter()
        .map(|role| role.name)
        .collect();

    let requires_mfa = state
        .config
        .mfa_required_roles
        .iter()
        .any(|required| role_names.iter().any(|held| held.eq_ignore_ascii_case(required)));

    if requires_mfa {
        if !user.mfa_enrolled() {
            state.metrics.mfa_event("not_enrolled");
            return Err(ApiError::Unauthorized {
                message: Some("mfa_not_enrolled".to_string()),
                trace_id: Some(trace_id),
            });
        }
        let secret = user.mfa_secret.as_deref().expect("mfa_enrolled implies mfa_secret set");
        let code = req.mfa_code.as_deref().and_then(normalize_mfa_code);
        let valid = code.as_deref().map(|code| verify_totp_code(secret, code)).unwrap_or(false);
        if !valid {
            state.metrics.mfa_event("invalid");
            state
                .audit
                .emit(
                    Some(user.organization_id),
                    user_actor(&user),
                    "User",
                    Some(user.id),
                    "mfa.challenge.failed",
                    AuditSeverity::Warn,
                    Some(trace_id),
                    json!({}),
                    json!({ "ip": metadata.ip, "user_agent": metadata.user_agent }),
                )
                .await;
            state
                .emit_mfa_activity(lockout_activity_event(&user, trace_id, "mfa.challenge_failed"), None)
                .await;
            return Err(ApiError::Unauthorized {
                message: Some("mfa_invalid".to_string()),
                trace_id: Some(trace_id),
            });
        }
        state.metrics.mfa_event("verified");
    }

    user.record_login_success(metadata.ip.clone());
    user_repo::update(uow.conn(), &user).await?;
    uow.track_events(user.drain_events());

    let permissions = role_repo::effective_permissions(uow.conn(), user.id).await?;
    let subject = TokenSubject {
        user_id: user.id,
        organization_id: user.organization_id,
        email: user.email.as_str().to_string(),
        roles: role_names.clone(),
        permissions,
    };
    let issued = state
        .token_signer
        .issue_access_token(&subject)
        .map_err(|err| ApiError::internal(err, Some(trace_id)))?;

    let (refresh_plaintext, refresh_row) = refresh_token::issue(user.id);
    refresh_token_repo::add(uow.conn(), &refresh_row).await?;

    state
        .audit
        .emit(
            Some(user.organization_id),
            user_actor(&user),
            "User",
            Some(user.id),
            "login.success",
            AuditSeverity::Info,
            Some(trace_id),
            json!({}),
            json!({ "ip": metadata.ip, "user_agent": metadata.user_agent }),
        )
        .await;

    uow.commit().await?;
    state.metrics.login_attempt("success");
    state.metrics.token_event("issued");

    let body = AuthResponse {
        access_token: issued.access_token,
        refresh_token: refresh_plaintext.clone(),
        token_type: issued.token_type,
        expires_in: issued.expires_in,
        user_id: user.id,
        organization_id: user.organization_id,
        email: user.email.as_str().to_string(),
        roles: role_names,
    };

    let mut response = Json(body).into_response();
    let max_age = (refresh_row.expires_at - Utc::now()).num_seconds();
    append_cookie(&mut response, &build_refresh_cookie(&state.config, &refresh_plaintext, max_age))?;
    Ok(response)
}

pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> Result<Response, ApiError> {
    let trace_id = Uuid::new_v4();
    let plaintext = req
        .refresh_token
        .clone()
        .or_else(|| extract_refresh_cookie(&headers, &state.config))
        .ok_or(ApiError::Unauthorized { message: None, trace_id: Some(trace_id) })?;
    let token_hash = refresh_token::hash(&plaintext);

    let mut uow = UnitOfWork::begin(&state.db, None).await?;
    let Some(existing) = refresh_token_repo::get_by_hash_for_update(uow.conn(), &token_hash).await? else {
        return Err(ApiError::TokenRevoked { trace_id: Some(trace_id) });
    };

    if existing.revoked_at.is_some() {
        // Presenting an already-revoked token is a replay; the whole family
        // is compromised and must be killed, not just this one token.
        refresh_token_repo::revoke_all_for_user(uow.conn(), existing.user_id).await?;
        state
            .audit
            .emit(
                None,
                common_audit::AuditActor { id: None, name: None, email: None },
                "User",
                Some(existing.user_id),
                "refresh_token.compromised",
                AuditSeverity::Critical,
                Some(trace_id),
                json!({}),
                json!({}),
            )
            .await;
        uow.commit().await?;
        state.metrics.token_event("replay_detected");
        return Err(ApiError::TokenRevoked { trace_id: Some(trace_id) });
    }

    if !existing.is_valid(Utc::now()) {
        return Err(ApiError::TokenExpired { trace_id: Some(trace_id) });
    }

    refresh_token_repo::revoke(uow.conn(), existing.id).await?;

    let admin_ctx = admin_bypass_context();
    let user = user_repo::get_by_id(uow.conn(), Some(&admin_ctx), existing.user_id)
        .await?
        .ok_or(ApiError::TokenRevoked { trace_id: Some(trace_id) })?;

    let role_names: Vec<String> = role_repo::roles_for_user(uow.conn(), user.id)
        .await?
        .into_iter()
        .map(|role| role.name)
        .collect();
    let permissions = role_repo::effective_permissions(uow.conn(), user.id).await?;

    let subject = TokenSubject {
        user_id: user.id,
        organization_id: user.organization_id,
        email: user.email.as_str().to_string(),
        roles: role_names.clone(),
        permissions,
    };
    let issued = state
        .token_signer
        .issue_access_token(&subject)
        .map_err(|err| ApiError::internal(err, Some(trace_id)))?;

    let (new_plaintext, new_row) = refresh_token::issue(user.id);
    refresh_token_repo::add(uow.conn(), &new_row).await?;

    state
        .audit
        .emit(
            Some(user.organization_id),
            common_audit::AuditActor { id: Some(user.id), name: None, email: Some(user.email.as_str().to_string()) },
            "User",
            Some(user.id),
            "refresh_token.rotated",
            AuditSeverity::Info,
            Some(trace_id),
            json!({}),
            json!({}),
        )
        .await;

    uow.commit().await?;
    state.metrics.token_event("refreshed");

    let body = AuthResponse {
        access_token: issued.access_token,
        refresh_token: new_plaintext.clone(),
        token_type: issued.token_type,
        expires_in: issued.expires_in,
        user_id: user.id,
        organization_id: user.organization_id,
        email: user.email.as_str().to_string(),
        roles: role_names,
    };

    let mut response = Json(body).into_response();
    let max_age = (new_row.expires_at - Utc::now()).num_seconds();
    append_cookie(&mut response, &build_refresh_cookie(&state.config, &new_plaintext, max_age))?;
    Ok(response)
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    if let Some(plaintext) = extract_refresh_cookie(&headers, &state.config) {
        let token_hash = refresh_token::hash(&plaintext);
        let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
        if let Some(existing) = refresh_token_repo::get_by_hash_for_update(&mut conn, &token_hash).await? {
            refresh_token_repo::revoke(&mut conn, existing.id).await?;
        }
    }
    let mut response = axum::http::StatusCode::NO_CONTENT.into_response();
    append_cookie(&mut response, &clear_refresh_cookie(&state.config))?;
    Ok(response)
}

/// Always returns success, matching or not: the response must not leak
/// whether `email` belongs to an account.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(req): Json<RequestPasswordResetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Ok(email) = Email::parse(&req.email) {
        let mut lookup_conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
        if let Some(user) = user_repo::get_by_email_global(&mut lookup_conn, &email).await? {
            drop(lookup_conn);
            let (plaintext, row) = single_use_token::issue(user.id, SingleUseTokenKind::PasswordReset);
            let tenant = TenantContext::new(user.organization_id).with_user(user.id);
            let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;
            single_use_token_repo::add(uow.conn(), &row).await?;
            uow.track_events(vec![Box::new(PasswordResetRequested {
                aggregate_id: user.id,
                organization_id: Some(user.organization_id),
            })]);
            uow.commit().await?;
            // Dispatch of the reset link itself rides the outbox worker off
            // `PasswordResetRequested`; the plaintext token never touches a
            // log line here.
            let _ = plaintext;
        }
    }
    Ok(Json(json!({ "message": "if an account exists, a reset link has been sent" })))
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(req): Json<ConfirmPasswordResetRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    let token_hash = single_use_token::hash(&req.token);
    let mut uow = UnitOfWork::begin(&state.db, None).await?;
    let Some(mut token) = single_use_token_repo::get_by_hash_for_update(uow.conn(), &token_hash).await? else {
        return Err(ApiError::NotFound { code: "invalid_token", trace_id: None });
    };
    if token.kind != SingleUseTokenKind::PasswordReset {
        return Err(ApiError::NotFound { code: "invalid_token", trace_id: None });
    }
    match token.check(Utc::now()) {
        TokenVerifyOutcome::Expired => return Err(ApiError::TokenExpired { trace_id: None }),
        TokenVerifyOutcome::AlreadyUsed => return Err(ApiError::TokenAlreadyUsed { trace_id: None }),
        TokenVerifyOutcome::Invalid => return Err(ApiError::NotFound { code: "invalid_token", trace_id: None }),
        TokenVerifyOutcome::Valid => {}
    }

    let admin_ctx = admin_bypass_context();
    let mut user = user_repo::get_by_id(uow.conn(), Some(&admin_ctx), token.user_id)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;

    let new_hash = PasswordHash::hash(&req.new_password).map_err(|err| ApiError::validation(json!({ "new_password": err.to_string() }), None))?;
    user.change_password(new_hash);
    token.mark_used().map_err(|err| ApiError::internal(err, None))?;

    user_repo::update(uow.conn(), &user).await?;
    single_use_token_repo::mark_used(uow.conn(), token.id).await?;
    refresh_token_repo::revoke_all_for_user(uow.conn(), user.id).await?;

    uow.track_events(user.drain_events());
    uow.track_events(vec![Box::new(PasswordResetCompleted {
        aggregate_id: user.id,
        organization_id: Some(user.organization_id),
    })]);

    state
        .audit
        .emit(
            Some(user.organization_id),
            common_audit::AuditActor { id: Some(user.id), name: None, email: Some(user.email.as_str().to_string()) },
            "User",
            Some(user.id),
            "password_reset.completed",
            AuditSeverity::Info,
            None,
            json!({}),
            json!({}),
        )
        .await;

    uow.commit().await?;
    Ok(axum::http::StatusCode::OK)
}

pub async fn request_email_verification(
    State(state): State<AppState>,
    Json(req): Json<RequestEmailVerificationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Ok(email) = Email::parse(&req.email) {
        let mut lookup_conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
        if let Some(user) = user_repo::get_by_email_global(&mut lookup_conn, &email).await? {
            drop(lookup_conn);
            if !user.email_verified {
                let (_, row) = single_use_token::issue(user.id, SingleUseTokenKind::EmailVerification);
                let tenant = TenantContext::new(user.organization_id).with_user(user.id);
                let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;
                single_use_token_repo::add(uow.conn(), &row).await?;
                uow.commit().await?;
            }
        }
    }
    Ok(Json(json!({ "message": "if an account exists, a verification link has been sent" })))
}

pub async fn confirm_email_verification(
    State(state): State<AppState>,
    Json(req): Json<ConfirmEmailVerificationRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    let token_hash = single_use_token::hash(&req.token);
    let mut uow = UnitOfWork::begin(&state.db, None).await?;
    let Some(mut token) = single_use_token_repo::get_by_hash_for_update(uow.conn(), &token_hash).await? else {
        return Err(ApiError::NotFound { code: "invalid_token", trace_id: None });
    };
    if token.kind != SingleUseTokenKind::EmailVerification {
        return Err(ApiError::NotFound { code: "invalid_token", trace_id: None });
    }
    match token.check(Utc::now()) {
        TokenVerifyOutcome::Expired => return Err(ApiError::TokenExpired { trace_id: None }),
        TokenVerifyOutcome::AlreadyUsed => return Err(ApiError::TokenAlreadyUsed { trace_id: None }),
        TokenVerifyOutcome::Invalid => return Err(ApiError::NotFound { code: "invalid_token", trace_id: None }),
        TokenVerifyOutcome::Valid => {}
    }

    let admin_ctx = admin_bypass_context();
    let mut user = user_repo::get_by_id(uow.conn(), Some(&admin_ctx), token.user_id)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;

    user.verify_email();
    token.mark_used().map_err(|err| ApiError::internal(err, None))?;

    user_repo::update(uow.conn(), &user).await?;
    single_use_token_repo::mark_used(uow.conn(), token.id).await?;
    uow.track_events(vec![Box::new(EmailVerified {
        aggregate_id: user.id,
        organization_id: Some(user.organization_id),
    })]);
    uow.commit().await?;
    Ok(axum::http::StatusCode::OK)
}
