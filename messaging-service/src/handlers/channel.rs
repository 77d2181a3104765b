use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use common_audit::AuditSeverity;
use common_auth::AuthContext;
use common_db::{Page, TenantContext, UnitOfWork};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::channel::Channel;
use crate::repo::channel_repo;

use super::{actor_from_claims, ensure_role_any, trace_id_from_headers};

const MANAGE_ROLES: &[&str] = &["super_admin", "reseller_admin", "tenant_admin"];

#[derive(Deserialize)]
pub struct CreateChannelRequest {
    pub phone_number_id: String,
    pub business_phone: String,
    pub access_token: String,
    pub webhook_secret: String,
    #[serde(default)]
    pub rate_limit_per_second: Option<i32>,
    #[serde(default)]
    pub monthly_message_limit: Option<i32>,
}

#[derive(Deserialize)]
pub struct UpdateChannelRequest {
    #[serde(default)]
    pub business_phone: Option<String>,
    #[serde(default)]
    pub rate_limit_per_second: Option<i32>,
    #[serde(default)]
    pub monthly_message_limit: Option<i32>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Serialize)]
pub struct ChannelResponse {
    pub id: Uuid,
    pub phone_number_id: String,
    pub business_phone: String,
    pub rate_limit_per_second: i32,
    pub monthly_message_limit: i32,
    pub is_active: bool,
    pub is_suspended: bool,
    pub messages_sent_this_period: i64,
}

impl From<&Channel> for ChannelResponse {
    fn from(channel: &Channel) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: channel.id,
            phone_number_id: channel.phone_number_id.clone(),
            business_phone: channel.business_phone.clone(),
            rate_limit_per_second: channel.rate_limit_per_second,
            monthly_message_limit: channel.monthly_message_limit,
            is_active: channel.is_active,
            is_suspended: channel.is_suspended,
            messages_sent_this_period: channel.usage_sent_this_period(now),
        }
    }
}

pub async fn create(
    auth: AuthContext,
    headers: axum::http::HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<Json<ChannelResponse>, ApiError> {
    ensure_role_any(&auth, MANAGE_ROLES)?;
    let trace_id = trace_id_from_headers(&headers);
    let organization_id = auth.claims.tenant_id;

    let mut channel = Channel::create(
        organization_id,
        req.phone_number_id,
        req.business_phone,
        &req.access_token,
        &req.webhook_secret,
        req.rate_limit_per_second.unwrap_or(state.config.default_rate_limit_per_second),
        req.monthly_message_limit.unwrap_or(state.config.default_monthly_message_limit),
        &state.master_key,
    )
    .map_err(|err| ApiError::validation(json!({ "channel": err.to_string() }), trace_id))?;

    let tenant = TenantContext::new(organization_id).with_user(auth.claims.subject);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;
    channel_repo::add(uow.conn(), &channel).await?;
    uow.track_events(channel.drain_events());

    state
        .audit
        .emit(
            Some(organization_id),
            actor_from_claims(&auth.claims),
            "Channel",
            Some(channel.id),
            "channel.created",
            AuditSeverity::Info,
            trace_id,
            json!({ "phone_number_id": channel.phone_number_id }),
            json!({}),
        )
        .await;

    uow.commit().await?;
    state.metrics.channel_event("created");
    Ok(Json(ChannelResponse::from(&channel)))
}

pub async fn list(
    auth: AuthContext,
    State(state): State<AppState>,
) -> Result<Json<Vec<ChannelResponse>>, ApiError> {
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    let channels = channel_repo::find_all(&mut conn, auth.claims.tenant_id, Page::default()).await?;
    Ok(Json(channels.iter().map(ChannelResponse::from).collect()))
}

pub async fn get(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChannelResponse>, ApiError> {
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    let channel = channel_repo::get_by_id(&mut conn, auth.claims.tenant_id, id)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;
    Ok(Json(ChannelResponse::from(&channel)))
}

pub async fn update(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateChannelRequest>,
) -> Result<Json<ChannelResponse>, ApiError> {
    ensure_role_any(&auth, MANAGE_ROLES)?;
    let organization_id = auth.claims.tenant_id;

    let tenant = TenantContext::new(organization_id).with_user(auth.claims.subject);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;
    let mut channel = channel_repo::get_by_id(uow.conn(), organization_id, id)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;

    if let Some(business_phone) = req.business_phone {
        channel.business_phone = business_phone;
    }
    if let Some(rate_limit) = req.rate_limit_per_second {
        channel.rate_limit_per_second = rate_limit;
    }
    if let Some(monthly_limit) = req.monthly_message_limit {
        channel.monthly_message_limit = monthly_limit;
    }
    match req.is_active {
        Some(false) => channel.deactivate(),
        Some(true) => {
            channel.is_active = true;
            channel.updated_at = chrono::Utc::now();
        }
        None => {}
    }

    channel_repo::update(uow.conn(), &channel).await?;
    uow.track_events(channel.drain_events());
    uow.commit().await?;
    Ok(Json(ChannelResponse::from(&channel)))
}

pub async fn delete(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ensure_role_any(&auth, MANAGE_ROLES)?;
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    channel_repo::delete(&mut conn, auth.claims.tenant_id, id).await?;
    state.metrics.channel_event("deleted");
    Ok(StatusCode::NO_CONTENT)
}
