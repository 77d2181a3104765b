use axum::extract::{Path, State};
use axum::Json;
use chrono::{Duration, Utc};
use common_audit::AuditSeverity;
use common_auth::AuthContext;
use common_db::{Page, TenantContext, UnitOfWork};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::message::{Message, MessageStatus};
use crate::repo::{channel_repo, message_repo, template_repo};

use super::{actor_from_claims, ensure_role_any, trace_id_from_headers};

const SEND_ROLES: &[&str] = &["super_admin", "reseller_admin", "tenant_admin", "agent"];
const CUSTOMER_SERVICE_WINDOW_HOURS: i64 = 24;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub channel_id: Uuid,
    pub to_phone: String,
    #[serde(default)]
    pub template_id: Option<Uuid>,
    pub content: Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Deserialize)]
pub struct SendBulkRequest {
    pub messages: Vec<SendMessageRequest>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub to_phone: String,
    pub status: &'static str,
    pub whatsapp_message_id: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: i32,
}

impl From<&Message> for MessageResponse {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            channel_id: message.channel_id,
            to_phone: message.to_phone.clone(),
            status: status_str(message.status),
            whatsapp_message_id: message.whatsapp_message_id.clone(),
            error_code: message.error_code.clone(),
            retry_count: message.retry_count,
        }
    }
}

fn status_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Queued => "queued",
        MessageStatus::Sent => "sent",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Read => "read",
        MessageStatus::Failed => "failed",
    }
}

async fn queue_one(
    state: &AppState,
    organization_id: Uuid,
    actor_id: Uuid,
    req: SendMessageRequest,
    trace_id: Option<Uuid>,
) -> Result<Message, ApiError> {
    let tenant = TenantContext::new(organization_id).with_user(actor_id);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;

    let mut channel = channel_repo::get_by_id(uow.conn(), organization_id, req.channel_id)
        .await?
        .ok_or(ApiError::NotFound { code: "channel_not_found", trace_id })?;

    if !channel.is_sendable() {
        return Err(ApiError::bad_request("channel_unavailable", trace_id));
    }

    if let Some(idempotency_key) = &req.idempotency_key {
        if let Some(existing) =
            message_repo::get_by_idempotency_key(uow.conn(), organization_id, req.channel_id, idempotency_key)
                .await?
        {
            return Ok(existing);
        }
    }

    let bucket_key = format!("{organization_id}:{}", channel.id);
    let rate = channel.rate_limit_per_second as f64;
    let decision = state
        .rate_limiter
        .check(&bucket_key, rate, rate, 1.0)
        .await
        .map_err(|e| ApiError::internal(e, trace_id))?;
    if !decision.allowed {
        state.metrics.rate_limit_decision("rejected");
        return Err(ApiError::RateLimited {
            retry_after_secs: Some(1),
            trace_id,
        });
    }
    state.metrics.rate_limit_decision("accepted");

    let now = Utc::now();
    if channel.quota_remaining(now) <= 0 {
        return Err(ApiError::bad_request("monthly_quota_exceeded", trace_id));
    }

    let last_inbound = message_repo::last_inbound_time(uow.conn(), organization_id, req.channel_id, &req.to_phone)
        .await?;
    let window_open = last_inbound
        .map(|t| now - t < Duration::hours(CUSTOMER_SERVICE_WINDOW_HOURS))
        .unwrap_or(false);

    if !window_open {
        let template_id = req
            .template_id
            .ok_or_else(|| ApiError::bad_request("template_required_outside_window", trace_id))?;
        let template = template_repo::get_by_id(uow.conn(), organization_id, template_id)
            .await?
            .ok_or(ApiError::NotFound { code: "template_not_found", trace_id })?;
        if !template.is_usable() {
            return Err(ApiError::bad_request("template_not_approved", trace_id));
        }
    }

    let mut message = Message::queue_outbound(
        organization_id,
        channel.id,
        req.to_phone,
        channel.business_phone.clone(),
        req.template_id,
        req.content,
        req.idempotency_key,
    )
    .map_err(|err| ApiError::validation(json!({ "message": err.to_string() }), trace_id))?;

    channel.record_send(now);
    channel_repo::update(uow.conn(), &channel).await?;
    message_repo::add(uow.conn(), &message).await?;
    uow.track_events(message.drain_events());
    uow.commit().await?;

    Ok(message)
}

pub async fn send(
    auth: AuthContext,
    headers: axum::http::HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    ensure_role_any(&auth, SEND_ROLES)?;
    let trace_id = trace_id_from_headers(&headers);
    let organization_id = auth.claims.tenant_id;

    let message = queue_one(&state, organization_id, auth.claims.subject, req, trace_id).await?;

    state
        .audit
        .emit(
            Some(organization_id),
            actor_from_claims(&auth.claims),
            "Message",
            Some(message.id),
            "message.queued",
            AuditSeverity::Info,
            trace_id,
            json!({ "channel_id": message.channel_id }),
            json!({}),
        )
        .await;
    state.metrics.message_sent("queued");

    Ok(Json(MessageResponse::from(&message)))
}

pub async fn send_bulk(
    auth: AuthContext,
    headers: axum::http::HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<SendBulkRequest>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    ensure_role_any(&auth, SEND_ROLES)?;
    let trace_id = trace_id_from_headers(&headers);
    let organization_id = auth.claims.tenant_id;

    let mut results = Vec::with_capacity(req.messages.len());
    for item in req.messages {
        match queue_one(&state, organization_id, auth.claims.subject, item, trace_id).await {
            Ok(message) => {
                state.metrics.message_sent("queued");
                results.push(MessageResponse::from(&message));
            }
            Err(_) => {
                state.metrics.message_sent("rejected");
            }
        }
    }
    Ok(Json(results))
}

pub async fn list(
    auth: AuthContext,
    State(state): State<AppState>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    let messages = message_repo::find_all(&mut conn, auth.claims.tenant_id, Page::default()).await?;
    Ok(Json(messages.iter().map(MessageResponse::from).collect()))
}

pub async fn get(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    let mut conn = state.db.acquire().await.map_err(|e| ApiError::internal(e, None))?;
    let message = message_repo::get_by_id(&mut conn, auth.claims.tenant_id, id)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;
    Ok(Json(MessageResponse::from(&message)))
}

/// Re-queues a message that exhausted its outbox-worker retries without
/// reaching a terminal state's opposite: only messages still sitting in
/// `failed` from a fully exhausted retry count are eligible.
pub async fn retry(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    ensure_role_any(&auth, SEND_ROLES)?;
    let organization_id = auth.claims.tenant_id;

    let tenant = TenantContext::new(organization_id).with_user(auth.claims.subject);
    let mut uow = UnitOfWork::begin(&state.db, Some(tenant)).await?;
    let mut message = message_repo::get_by_id(uow.conn(), organization_id, id)
        .await?
        .ok_or(ApiError::NotFound { code: "not_found", trace_id: None })?;

    message.reset_for_retry().map_err(|err| ApiError::BadRequest {
        code: "message_not_retryable",
        trace_id: None,
        message: Some(err.to_string()),
    })?;

    message_repo::update(uow.conn(), &message).await?;
    uow.track_events(message.drain_events());
    uow.commit().await?;
    Ok(Json(MessageResponse::from(&message)))
}
