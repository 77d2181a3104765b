use axum::extract::{Path, State};
use axum::Json;
use common_audit::AuditSeverity;
use common_auth::AuthContext;
use common_db::{Page, TenantContext, UnitOfWork};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::template::Template;
use crate::repo::template_repo;

use super::{actor_from_claims, ensure_role_any, trace_id_from_headers};

const MANAGE_ROLES: &[&str] = &["super_admin", "reseller_admin", "tenant_admin", "agent"];

#[derive(Deserialize)]
pub struct CreateTemplateRequest {
    pub channel_id: Uuid,
    pub name: String,
    pub language: String,
    pub category: String,
    pub body: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

#[derive(Deserialize)]
pub struct TestTemplateRequest {
    #[serde(default)]
    pub variables: Vec<String>,
}

#[derive(Serialize)]
pub struct TemplateResponse {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub name: String,
    pub language: String,
    pub category: String,
    pub status: &'static str,
    pub provider_template_id: Option<String>,
    pub rejection_reason: Option<String>,
}

impl From<&Template> for TemplateResponse {
    fn from(template: &Template) -> Self {
        Self {
            id: template.id,
            channel_id: template.channel_id,
            name: template.name.clone(),
            language: template.language.clone(),
            category: template.category.clone(),
            status: status_str(template.status),
            provider_template_id: template.provider_template_id.clone(),
            rejection_reason: template.rejection_reason.clone(),
        }
    }
}

fn status_str(status: crate::domain::template::TemplateStatus) -> &'static str {
    use crate::domain::template::TemplateStatus::*;
    match status {
        Draft => "draft",
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

pub async fn create(
    auth: AuthContext,
    headers: axum::http::HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<Json<TemplateResponse>, ApiError> {
    ensure_role_any(&auth, MANAGE_ROLES)?;
    let trace_id = trace_id_from_headers(&headers);
    let organization_id = auth.claims.tenant_id;

    let mut template = Template::create(
        organization_id,
        req.channel_id,
        req.name,
        req.language,
        req.category,
        req.body,
        req.variables,
    )
    .map_err(|err| ApiError::validation(json!({ "template": err.to_string() }), trace_id))?;

    let tenant = TenantContext::new(organization_id).with_user(auth.claims.subject);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;
    template_repo::add(uow.conn(), &template).await?;
    uow.track_events(template.drain_events());

    state
        .audit
        .emit(
            Some(organization_id),
            actor_from_claims(&auth.claims),
            "Template",
            Some(template.id),
            "template.created",
            AuditSeverity::Info,
            trace_id,
            json!({ "name": template.name }),
            json!({}),
        )
        .await;

    uow.commit().await?;
    Ok(Json(TemplateResponse::from(&template)))
}

pub async fn list(
    auth: AuthContext,
    State(state): State<AppState>,
) -> Result<Json<Vec<TemplateResponse>>, ApiError> {
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    let templates = template_repo::find_all(&mut conn, auth.claims.tenant_id, Page::default()).await?;
    Ok(Json(templates.iter().map(TemplateResponse::from).collect()))
}

pub async fn submit(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TemplateResponse>, ApiError> {
    ensure_role_any(&auth, MANAGE_ROLES)?;
    let organization_id = auth.claims.tenant_id;

    let tenant = TenantContext::new(organization_id).with_user(auth.claims.subject);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;
    let mut template = template_repo::get_by_id(uow.conn(), organization_id, id)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;

    template.submit().map_err(|err| ApiError::BadRequest {
        code: "template_not_submittable",
        trace_id: None,
        message: Some(err.to_string()),
    })?;

    template_repo::update(uow.conn(), &template).await?;
    uow.track_events(template.drain_events());
    uow.commit().await?;
    Ok(Json(TemplateResponse::from(&template)))
}

/// Renders the template against the given variables without persisting or
/// sending anything, so callers can preview the final text before
/// submitting it for provider approval.
pub async fn test(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TestTemplateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_role_any(&auth, MANAGE_ROLES)?;
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    let template = template_repo::get_by_id(&mut conn, auth.claims.tenant_id, id)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;

    let rendered = template.render(&req.variables);
    Ok(Json(json!({ "rendered": rendered })))
}
