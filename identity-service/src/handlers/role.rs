use std::collections::BTreeSet;

use axum::extract::{Path, State};
use axum::Json;
use common_audit::AuditSeverity;
use common_auth::AuthContext;
use common_db::{TenantContext, UnitOfWork};
use common_http_errors::ApiError;
use common_security::roles::{parse_role, Role as PlatformRole};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::events::{RoleAssigned, RoleRevoked};
use crate::domain::permission::Permission;
use crate::domain::role::{Role, UserRole};
use crate::repo::role_repo;

use super::{actor_from_claims, ensure_role_any, trace_id_from_headers};

#[derive(Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub permissions: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub description: Option<String>,
    pub permissions: Vec<String>,
}

#[derive(Deserialize)]
pub struct AssignRoleRequest {
    pub user_id: Uuid,
    pub role_id: Uuid,
}

#[derive(Deserialize)]
pub struct RevokeRoleRequest {
    pub user_id: Uuid,
    pub role_id: Uuid,
}

#[derive(Serialize)]
pub struct RoleResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<String>,
    pub is_system: bool,
}

impl From<&Role> for RoleResponse {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
            description: role.description.clone(),
            permissions: role.permission_strings(),
            is_system: role.is_system,
        }
    }
}

fn parse_permissions(raw: Vec<String>) -> Result<BTreeSet<Permission>, ApiError> {
    raw.into_iter()
        .map(|p| Permission::parse(&p).map_err(|err| ApiError::validation(json!({ "permissions": err.to_string() }), None)))
        .collect()
}

fn tenant_from_auth(auth: &AuthContext) -> TenantContext {
    TenantContext::new(auth.claims.tenant_id)
        .with_user(auth.claims.subject)
        .with_roles(auth.claims.roles.clone())
}

/// The caller's own highest-ranked role claim, used to decide whether they
/// outrank the role they are trying to assign or revoke.
fn caller_rank(auth: &AuthContext) -> PlatformRole {
    auth.claims
        .roles
        .iter()
        .map(|name| parse_role(name))
        .max_by_key(|role| role.rank().unwrap_or(0))
        .unwrap_or(PlatformRole::Unknown(String::new()))
}

pub async fn list(auth: AuthContext, State(state): State<AppState>) -> Result<Json<Vec<RoleResponse>>, ApiError> {
    ensure_role_any(&auth, &["super_admin", "reseller_admin", "tenant_admin"])?;
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    let tenant = tenant_from_auth(&auth);
    let roles = role_repo::find_all(&mut conn, &tenant).await?;
    Ok(Json(roles.iter().map(RoleResponse::from).collect()))
}

pub async fn create(
    auth: AuthContext,
    State(state): State<AppState>,
    Json(req): Json<CreateRoleRequest>,
) -> Result<Json<RoleResponse>, ApiError> {
    ensure_role_any(&auth, &["super_admin", "reseller_admin", "tenant_admin"])?;
    let permissions = parse_permissions(req.permissions)?;

    let tenant = tenant_from_auth(&auth);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;

    if role_repo::exists_with_name(uow.conn(), uow.tenant().expect("set above"), &req.name).await? {
        return Err(ApiError::Conflict {
            code: "role_name_taken",
            message: Some("a role with this name already exists".to_string()),
            trace_id: None,
        });
    }

    let role = Role::create(auth.claims.tenant_id, req.name, req.description, permissions)
        .map_err(|err| ApiError::validation(json!({ "role": err.to_string() }), None))?;
    role_repo::add(uow.conn(), &role).await?;
    uow.commit().await?;
    Ok(Json(RoleResponse::from(&role)))
}

pub async fn update(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(role_id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<RoleResponse>, ApiError> {
    ensure_role_any(&auth, &["super_admin", "reseller_admin", "tenant_admin"])?;
    let permissions = parse_permissions(req.permissions)?;

    let tenant = tenant_from_auth(&auth);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;

    let mut role = role_repo::get_by_id(uow.conn(), role_id)
        .await?
        .filter(|role| role.organization_id == auth.claims.tenant_id)
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;

    role.update(req.description, permissions)
        .map_err(|err| ApiError::Conflict { code: "system_role_immutable", message: Some(err.to_string()), trace_id: None })?;
    role_repo::update(uow.conn(), &role).await?;
    uow.commit().await?;
    Ok(Json(RoleResponse::from(&role)))
}

pub async fn assign(
    auth: AuthContext,
    headers: axum::http::HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    ensure_role_any(&auth, &["super_admin", "reseller_admin", "tenant_admin"])?;
    let trace_id = trace_id_from_headers(&headers);

    let tenant = tenant_from_auth(&auth);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;

    let role = role_repo::get_by_id(uow.conn(), req.role_id)
        .await?
        .filter(|role| role.organization_id == auth.claims.tenant_id)
        .ok_or(ApiError::NotFound { code: "not_found", trace_id })?;

    // A caller may only hand out roles they do not themselves outrank below.
    let target_rank = parse_role(&role.name);
    if target_rank.outranks(&caller_rank(&auth)) {
        return Err(ApiError::Forbidden { trace_id });
    }

    role_repo::assign(
        uow.conn(),
        &UserRole {
            user_id: req.user_id,
            role_id: req.role_id,
            granted_at: chrono::Utc::now(),
            granted_by: Some(auth.claims.subject),
        },
    )
    .await?;

    uow.track_events(vec![Box::new(RoleAssigned {
        aggregate_id: req.user_id,
        organization_id: Some(auth.claims.tenant_id),
        role_id: req.role_id,
        granted_by: Some(auth.claims.subject),
    })]);

    state
        .audit
        .emit(
            Some(auth.claims.tenant_id),
            actor_from_claims(&auth.claims),
            "UserRole",
            Some(req.user_id),
            "role.assigned",
            AuditSeverity::Info,
            trace_id,
            json!({ "role_id": req.role_id }),
            json!({}),
        )
        .await;

    uow.commit().await?;
    state.metrics.role_change("assigned");
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn revoke(
    auth: AuthContext,
    headers: axum::http::HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<RevokeRoleRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    ensure_role_any(&auth, &["super_admin", "reseller_admin", "tenant_admin"])?;
    let trace_id = trace_id_from_headers(&headers);

    let tenant = tenant_from_auth(&auth);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;

    let role = role_repo::get_by_id(uow.conn(), req.role_id)
        .await?
        .filter(|role| role.organization_id == auth.claims.tenant_id)
        .ok_or(ApiError::NotFound { code: "not_found", trace_id })?;

    let target_rank = parse_role(&role.name);
    if target_rank.outranks(&caller_rank(&auth)) {
        return Err(ApiError::Forbidden { trace_id });
    }

    role_repo::revoke(uow.conn(), req.user_id, req.role_id).await?;

    uow.track_events(vec![Box::new(RoleRevoked {
        aggregate_id: req.user_id,
        organization_id: Some(auth.claims.tenant_id),
        role_id: req.role_id,
        revoked_by: Some(auth.claims.subject),
    })]);

    state
        .audit
        .emit(
            Some(auth.claims.tenant_id),
            actor_from_claims(&auth.claims),
            "UserRole",
            Some(req.user_id),
            "role.revoked",
            AuditSeverity::Info,
            trace_id,
            json!({ "role_id": req.role_id }),
            json!({}),
        )
        .await;

    uow.commit().await?;
    state.metrics.role_change("revoked");
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn for_user(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<RoleResponse>>, ApiError> {
    ensure_role_any(&auth, &["super_admin", "reseller_admin", "tenant_admin"])?;
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    let roles = role_repo::roles_for_user(&mut conn, user_id).await?;
    let roles: Vec<_> = roles
        .into_iter()
        .filter(|role| role.organization_id == auth.claims.tenant_id)
        .collect();
    Ok(Json(roles.iter().map(RoleResponse::from).collect()))
}
