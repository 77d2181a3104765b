use axum::extract::{Path, State};
use axum::Json;
use common_audit::AuditSeverity;
use common_auth::AuthContext;
use common_db::{TenantContext, UnitOfWork};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::api_key;
use crate::repo::api_key_repo;

use super::{actor_from_claims, ensure_role_any, trace_id_from_headers};

#[derive(Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize)]
pub struct ApiKeyCreatedResponse {
    pub id: Uuid,
    pub key: String,
    pub key_prefix: String,
}

#[derive(Serialize)]
pub struct ApiKeySummaryResponse {
    pub id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub is_active: bool,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// The plaintext key is returned exactly once, in this response; only its
/// hash and visible prefix are ever persisted.
pub async fn create(
    auth: AuthContext,
    headers: axum::http::HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<Json<ApiKeyCreatedResponse>, ApiError> {
    ensure_role_any(&auth, &["super_admin", "reseller_admin", "tenant_admin"])?;
    let trace_id = trace_id_from_headers(&headers);

    let permissions = req
        .permissions
        .into_iter()
        .map(|p| {
            crate::domain::permission::Permission::parse(&p)
                .map_err(|err| ApiError::validation(json!({ "permissions": err.to_string() }), trace_id))
        })
        .collect::<Result<_, _>>()?;

    let (plaintext, row) = api_key::issue(
        auth.claims.tenant_id,
        Some(auth.claims.subject),
        req.name,
        permissions,
        req.expires_at,
    );

    let tenant = TenantContext::new(auth.claims.tenant_id)
        .with_user(auth.claims.subject)
        .with_roles(auth.claims.roles.clone());
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;
    api_key_repo::add(uow.conn(), &row).await?;

    uow.track_events(vec![Box::new(crate::domain::events::ApiKeyCreated {
        aggregate_id: row.id,
        organization_id: Some(auth.claims.tenant_id),
        prefix: row.key_prefix.clone(),
    })]);

    state
        .audit
        .emit(
            Some(auth.claims.tenant_id),
            actor_from_claims(&auth.claims),
            "ApiKey",
            Some(row.id),
            "api_key.created",
            AuditSeverity::Info,
            trace_id,
            json!({ "prefix": row.key_prefix }),
            json!({}),
        )
        .await;

    uow.commit().await?;
    Ok(Json(ApiKeyCreatedResponse {
        id: row.id,
        key: plaintext,
        key_prefix: row.key_prefix,
    }))
}

pub async fn list(
    auth: AuthContext,
    State(state): State<AppState>,
) -> Result<Json<Vec<ApiKeySummaryResponse>>, ApiError> {
    ensure_role_any(&auth, &["super_admin", "reseller_admin", "tenant_admin"])?;
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    let tenant = TenantContext::new(auth.claims.tenant_id).with_roles(auth.claims.roles.clone());
    let keys = api_key_repo::find_all(&mut conn, &tenant).await?;
    Ok(Json(
        keys.iter()
            .map(|key| ApiKeySummaryResponse {
                id: key.id,
                name: key.name.clone(),
                key_prefix: key.key_prefix.clone(),
                is_active: key.is_active,
                last_used_at: key.last_used_at,
                expires_at: key.expires_at,
            })
            .collect(),
    ))
}

pub async fn revoke(
    auth: AuthContext,
    headers: axum::http::HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, ApiError> {
    ensure_role_any(&auth, &["super_admin", "reseller_admin", "tenant_admin"])?;
    let trace_id = trace_id_from_headers(&headers);

    let tenant = TenantContext::new(auth.claims.tenant_id)
        .with_user(auth.claims.subject)
        .with_roles(auth.claims.roles.clone());
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;

    let keys = api_key_repo::find_all(uow.conn(), uow.tenant().expect("set above")).await?;
    let mut key = keys
        .into_iter()
        .find(|key| key.id == id)
        .ok_or(ApiError::NotFound { code: "not_found", trace_id })?;

    key.revoke().map_err(|err| ApiError::Conflict {
        code: "already_revoked",
        message: Some(err.to_string()),
        trace_id,
    })?;
    api_key_repo::update(uow.conn(), &key).await?;

    uow.track_events(vec![Box::new(crate::domain::events::ApiKeyRevoked {
        aggregate_id: key.id,
        organization_id: Some(auth.claims.tenant_id),
    })]);

    state
        .audit
        .emit(
            Some(auth.claims.tenant_id),
            actor_from_claims(&auth.claims),
            "ApiKey",
            Some(key.id),
            "api_key.revoked",
            AuditSeverity::Info,
            trace_id,
            json!({}),
            json!({}),
        )
        .await;

    uow.commit().await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
