use axum::extract::{Path, State};
use axum::Json;
use common_audit::AuditSeverity;
use common_db::{TenantContext, UnitOfWork};
use common_http_errors::ApiError;
use common_auth::AuthContext;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::email::Email;
use crate::domain::organization::{Organization, OrganizationMetadata};
use crate::domain::password::PasswordHash;
use crate::domain::permission::Permission;
use crate::domain::phone::Phone;
use crate::domain::role::{Role, SYSTEM_ROLE_NAMES};
use crate::domain::user::User;
use crate::repo::{organization_repo, role_repo, user_repo};

use super::{actor_from_claims, ensure_role_any, ensure_tenant_access, trace_id_from_headers};

#[derive(Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub industry: Option<String>,
    pub owner_email: String,
    pub owner_password: String,
    pub owner_full_name: String,
    #[serde(default)]
    pub owner_phone: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct UpdateOrganizationRequest {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub branding: Option<serde_json::Value>,
    #[serde(default)]
    pub features: Option<serde_json::Value>,
    #[serde(default)]
    pub limits: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct OrganizationResponse {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub industry: Option<String>,
    pub is_active: bool,
}

impl From<&Organization> for OrganizationResponse {
    fn from(org: &Organization) -> Self {
        Self {
            id: org.id,
            name: org.name.clone(),
            slug: org.slug.clone(),
            industry: org.industry.clone(),
            is_active: org.is_active,
        }
    }
}

/// The permission set granted to each of the five seeded system roles.
/// `OwnerAdmin` and `ResellerAdmin` hold the same capabilities by design:
/// a reseller manages the tenants under it the same way a tenant's own
/// owner manages it, they differ only in which organizations they can see.
fn system_role_permissions(role_name: &str) -> Vec<Permission> {
    const ALL: &[&str] = &[
        "organization:manage",
        "user:manage",
        "role:manage",
        "api_key:manage",
        "channel:manage",
        "template:manage",
        "message:send",
        "audit:view",
    ];
    const TENANT_ADMIN: &[&str] = &[
        "user:manage",
        "role:manage",
        "api_key:manage",
        "channel:manage",
        "template:manage",
        "message:send",
        "audit:view",
    ];
    const AGENT: &[&str] = &["template:manage", "message:send"];

    let raw: &[&str] = match role_name {
        "OwnerAdmin" | "ResellerAdmin" => ALL,
        "TenantAdmin" => TENANT_ADMIN,
        "Agent" => AGENT,
        _ => &[],
    };
    raw.iter().map(|p| Permission::parse(p).expect("static permission strings are valid")).collect()
}

/// Creates an organization, seeds its five system roles, and registers the
/// owner account, all inside one transaction: a tenant with no usable owner
/// account is a state nothing downstream can recover from on its own.
pub async fn create(
    auth: AuthContext,
    headers: axum::http::HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateOrganizationRequest>,
) -> Result<Json<OrganizationResponse>, ApiError> {
    ensure_role_any(&auth, &["super_admin", "reseller_admin"])?;
    let trace_id = trace_id_from_headers(&headers);

    let mut org = Organization::create(req.name, req.slug, req.industry)
        .map_err(|err| ApiError::validation(json!({ "organization": err.to_string() }), trace_id))?;

    let owner_email = Email::parse(&req.owner_email)
        .map_err(|err| ApiError::validation(json!({ "owner_email": err.to_string() }), trace_id))?;
    let owner_phone = req
        .owner_phone
        .map(|p| Phone::parse(&p))
        .transpose()
        .map_err(|err| ApiError::validation(json!({ "owner_phone": err.to_string() }), trace_id))?;
    let owner_password = PasswordHash::hash(&req.owner_password)
        .map_err(|err| ApiError::validation(json!({ "owner_password": err.to_string() }), trace_id))?;

    let tenant = TenantContext::new(org.id).with_roles(vec!["system".to_string()]);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;

    if organization_repo::exists_with_slug(uow.conn(), &org.slug).await? {
        return Err(ApiError::Conflict {
            code: "slug_taken",
            message: Some("organization slug already exists".to_string()),
            trace_id,
        });
    }
    if user_repo::exists_with_email(uow.conn(), &owner_email).await? {
        return Err(ApiError::Conflict {
            code: "email_taken",
            message: Some("owner email already registered".to_string()),
            trace_id,
        });
    }

    organization_repo::add(uow.conn(), &org).await?;

    let mut seeded_roles = Vec::with_capacity(SYSTEM_ROLE_NAMES.len());
    for name in SYSTEM_ROLE_NAMES {
        let role = Role::seed_system(org.id, name, system_role_permissions(name).into_iter().collect());
        role_repo::add(uow.conn(), &role).await?;
        seeded_roles.push(role);
    }

    let owner_role = seeded_roles
        .iter()
        .find(|r| r.name == "OwnerAdmin")
        .expect("OwnerAdmin is always seeded");

    let mut owner = User::register(org.id, owner_email, owner_password, req.owner_full_name, owner_phone);
    owner.verify_email();
    user_repo::add(uow.conn(), &owner).await?;
    role_repo::assign(
        uow.conn(),
        &crate::domain::role::UserRole {
            user_id: owner.id,
            role_id: owner_role.id,
            granted_at: chrono::Utc::now(),
            granted_by: None,
        },
    )
    .await?;

    uow.track_events(org.drain_events());
    uow.track_events(owner.drain_events());

    state
        .audit
        .emit(
            Some(org.id),
            actor_from_claims(&auth.claims),
            "Organization",
            Some(org.id),
            "organization.created",
            AuditSeverity::Info,
            trace_id,
            json!({ "slug": org.slug }),
            json!({}),
        )
        .await;

    uow.commit().await?;
    Ok(Json(OrganizationResponse::from(&org)))
}

pub async fn get(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrganizationResponse>, ApiError> {
    ensure_tenant_access(&auth, id)?;
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    let org = organization_repo::get_by_id(&mut conn, id)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;
    Ok(Json(OrganizationResponse::from(&org)))
}

/// Applies a partial update to the organization's metadata fields. Any
/// field omitted from the request keeps its current stored value.
pub async fn update(
    auth: AuthContext,
    headers: axum::http::HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateOrganizationRequest>,
) -> Result<Json<OrganizationResponse>, ApiError> {
    ensure_tenant_access(&auth, id)?;
    ensure_role_any(&auth, &["super_admin", "reseller_admin", "tenant_admin"])?;
    let trace_id = trace_id_from_headers(&headers);

    let tenant = TenantContext::new(id).with_user(auth.claims.subject);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;
    let mut org = organization_repo::get_by_id(uow.conn(), id)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;

    let current = org.metadata.clone();
    org.update_metadata(OrganizationMetadata {
        timezone: req.timezone.or(current.timezone),
        language: req.language.or(current.language),
        branding: req.branding.unwrap_or(current.branding),
        features: req.features.unwrap_or(current.features),
        limits: req.limits.unwrap_or(current.limits),
    });

    organization_repo::update(uow.conn(), &org).await?;

    state
        .audit
        .emit(
            Some(org.id),
            actor_from_claims(&auth.claims),
            "Organization",
            Some(org.id),
            "organization.updated",
            AuditSeverity::Info,
            trace_id,
            json!({}),
            json!({}),
        )
        .await;

    uow.commit().await?;
    Ok(Json(OrganizationResponse::from(&org)))
}

pub async fn get_mine(
    auth: AuthContext,
    State(state): State<AppState>,
) -> Result<Json<OrganizationResponse>, ApiError> {
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    let org = organization_repo::get_by_id(&mut conn, auth.claims.tenant_id)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;
    Ok(Json(OrganizationResponse::from(&org)))
}
