use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use chrono::Utc;
use common_db::{TenantContext, UnitOfWork};
use redis::AsyncCommands;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::message::Message;
use crate::repo::{channel_repo, message_repo};
use crate::webhook_security::verify_signature;

#[derive(Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// The provider's subscription handshake: echo `hub.challenge` back only if
/// `hub.verify_token` matches the channel's configured webhook secret.
pub async fn verify(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<VerifyQuery>,
) -> Result<String, StatusCode> {
    if query.mode.as_deref() != Some("subscribe") {
        return Err(StatusCode::FORBIDDEN);
    }
    let mut conn = state.db.acquire().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let channel = channel_repo::get_by_id_unscoped(&mut conn, channel_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let expected_token = channel
        .decrypt_webhook_secret(&state.master_key)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    match (&query.verify_token, &query.challenge) {
        (Some(token), Some(challenge)) if *token == expected_token => Ok(challenge.clone()),
        _ => Err(StatusCode::FORBIDDEN),
    }
}

#[derive(Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<WebhookEntry>,
}

#[derive(Deserialize)]
struct WebhookEntry {
    #[serde(default)]
    changes: Vec<WebhookChange>,
}

#[derive(Deserialize)]
struct WebhookChange {
    value: WebhookValue,
}

#[derive(Deserialize)]
struct WebhookValue {
    #[serde(default)]
    metadata: Option<WebhookMetadata>,
    #[serde(default)]
    messages: Vec<InboundMessage>,
    #[serde(default)]
    statuses: Vec<StatusUpdate>,
}

#[derive(Deserialize)]
struct WebhookMetadata {
    phone_number_id: String,
}

#[derive(Deserialize)]
struct InboundMessage {
    id: String,
    from: String,
    #[serde(flatten)]
    body: Value,
}

#[derive(Deserialize)]
struct StatusUpdate {
    id: String,
    status: String,
    #[serde(default)]
    errors: Vec<StatusError>,
}

#[derive(Deserialize)]
struct StatusError {
    #[serde(default)]
    code: Option<i64>,
}

/// Accepts an inbound webhook delivery: verifies the HMAC signature in
/// constant time, then fans each entry out to either a new inbound message
/// or a status update on a previously sent one. Always returns 200 once the
/// signature checks out, even if individual entries fail to parse, so the
/// provider doesn't retry a batch we've already partially applied.
pub async fn receive(
    State(mut state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature_header = match headers.get("X-Hub-Signature-256").and_then(|h| h.to_str().ok()) {
        Some(value) => value.to_string(),
        None => return StatusCode::UNAUTHORIZED,
    };

    let mut conn = match state.db.acquire().await {
        Ok(conn) => conn,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR,
    };
    let channel = match channel_repo::get_by_id_unscoped(&mut conn, channel_id).await {
        Ok(Some(channel)) => channel,
        Ok(None) => return StatusCode::NOT_FOUND,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR,
    };
    drop(conn);

    let secret = match channel.decrypt_webhook_secret(&state.master_key) {
        Ok(secret) => secret,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR,
    };

    if !verify_signature(&secret, &signature_header, &body) {
        tracing::warn!(%channel_id, "webhook signature mismatch");
        state.metrics.webhook_event("signature_mismatch");
        return StatusCode::UNAUTHORIZED;
    }

    let Ok(payload) = serde_json::from_slice::<WebhookPayload>(&body) else {
        state.metrics.webhook_event("unparseable");
        return StatusCode::OK;
    };

    for entry in payload.entry {
        for change in entry.changes {
            let value = change.value;
            for message in value.messages {
                handle_inbound(&mut state, &channel, &value.metadata, message).await;
            }
            for status in value.statuses {
                handle_status(&mut state, &channel, status).await;
            }
        }
    }

    state.metrics.webhook_event("accepted");
    StatusCode::OK
}

async fn handle_inbound(
    state: &mut AppState,
    channel: &crate::domain::channel::Channel,
    metadata: &Option<WebhookMetadata>,
    message: InboundMessage,
) {
    let dedup_key = format!("webhook:msg:{}", message.id);
    let already_seen: bool = match state
        .dedup_cache
        .set_nx::<_, _, bool>(&dedup_key, true)
        .await
    {
        Ok(inserted) => !inserted,
        Err(_) => false,
    };
    if already_seen {
        return;
    }
    let _: Result<(), _> = state
        .dedup_cache
        .expire(&dedup_key, state.config.webhook_dedup_ttl_seconds as i64)
        .await;

    let to_phone = metadata
        .as_ref()
        .map(|m| m.phone_number_id.clone())
        .unwrap_or_else(|| channel.phone_number_id.clone());

    let inbound = Message::record_inbound(
        channel.organization_id,
        channel.id,
        message.from.clone(),
        to_phone,
        message.id,
        message.body,
    );

    let Ok(mut db_conn) = state.db.acquire().await else {
        return;
    };
    let _ = message_repo::add(&mut db_conn, &inbound).await;
    let _ = message_repo::touch_conversation_window(
        &mut db_conn,
        channel.organization_id,
        channel.id,
        &inbound.from_phone,
        Utc::now(),
    )
    .await;
    state.metrics.webhook_event("inbound_message");
}

async fn handle_status(state: &mut AppState, channel: &crate::domain::channel::Channel, status: StatusUpdate) {
    let tenant = TenantContext::new(channel.organization_id);
    let Ok(mut uow) = UnitOfWork::begin(&state.db, Some(tenant)).await else {
        return;
    };
    let Ok(Some(mut message)) = message_repo::get_by_whatsapp_message_id(uow.conn(), &status.id).await else {
        return;
    };

    let outcome = match status.status.as_str() {
        "sent" => message.mark_sent(status.id.clone()),
        "delivered" => message.mark_delivered(),
        "read" => message.mark_read(),
        "failed" => {
            let error_code = status
                .errors
                .first()
                .and_then(|e| e.code)
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            message.mark_failed(error_code)
        }
        _ => Ok(()),
    };
    if outcome.is_err() {
        return;
    }

    let _ = message_repo::update(uow.conn(), &message).await;
    uow.track_events(message.drain_events());
    let _ = uow.commit().await;

    if status.status == "failed" {
        apply_failure_side_effects(state, channel, &status).await;
    }
    state.metrics.webhook_event("status_update");
}

/// Certain provider failure codes carry channel-level consequences beyond
/// the individual message: a rate-limit code throttles the bucket, a
/// token-invalid code deactivates the channel, and a suspension code marks
/// it suspended until an operator intervenes.
async fn apply_failure_side_effects(state: &mut AppState, channel: &crate::domain::channel::Channel, status: &StatusUpdate) {
    let Some(code) = status.errors.first().and_then(|e| e.code) else {
        return;
    };

    let tenant = TenantContext::new(channel.organization_id);
    let Ok(mut uow) = UnitOfWork::begin(&state.db, Some(tenant)).await else {
        return;
    };
    let Ok(Some(mut channel)) = channel_repo::get_by_id(uow.conn(), channel.organization_id, channel.id).await else {
        return;
    };

    match code {
        190 => channel.deactivate(),
        368 => channel.suspend("provider flagged account for policy violation"),
        4 | 80007 => channel.suspend("provider rate limit exceeded"),
        _ => return,
    }

    let _ = channel_repo::update(uow.conn(), &channel).await;
    uow.track_events(channel.drain_events());
    let _ = uow.commit().await;
}
