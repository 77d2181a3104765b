use chrono::{DateTime, Utc};
use common_db::{map_sqlx_error, Page, RepoError};
use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::message::{Message, MessageDirection, MessageStatus};

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    organization_id: Uuid,
    channel_id: Uuid,
    direction: String,
    to_phone: String,
    from_phone: String,
    template_id: Option<Uuid>,
    content: Value,
    content_hash: String,
    status: String,
    whatsapp_message_id: Option<String>,
    idempotency_key: Option<String>,
    error_code: Option<String>,
    retry_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn direction_from_str(s: &str) -> MessageDirection {
    match s {
        "inbound" => MessageDirection::Inbound,
        _ => MessageDirection::Outbound,
    }
}

fn direction_as_str(direction: MessageDirection) -> &'static str {
    match direction {
        MessageDirection::Inbound => "inbound",
        MessageDirection::Outbound => "outbound",
    }
}

fn status_from_str(s: &str) -> MessageStatus {
    match s {
        "sent" => MessageStatus::Sent,
        "delivered" => MessageStatus::Delivered,
        "read" => MessageStatus::Read,
        "failed" => MessageStatus::Failed,
        _ => MessageStatus::Queued,
    }
}

fn status_as_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Queued => "queued",
        MessageStatus::Sent => "sent",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Read => "read",
        MessageStatus::Failed => "failed",
    }
}

fn from_row(row: MessageRow) -> Message {
    Message {
        id: row.id,
        organization_id: row.organization_id,
        channel_id: row.channel_id,
        direction: direction_from_str(&row.direction),
        to_phone: row.to_phone,
        from_phone: row.from_phone,
        template_id: row.template_id,
        content: row.content,
        content_hash: row.content_hash,
        status: status_from_str(&row.status),
        whatsapp_message_id: row.whatsapp_message_id,
        idempotency_key: row.idempotency_key,
        error_code: row.error_code,
        retry_count: row.retry_count,
        created_at: row.created_at,
        updated_at: row.updated_at,
        events: Default::default(),
    }
}

const SELECT_COLUMNS: &str = "id, organization_id, channel_id, direction, to_phone, from_phone, \
     template_id, content, content_hash, status, whatsapp_message_id, idempotency_key, \
     error_code, retry_count, created_at, updated_at";

pub async fn add(conn: &mut PgConnection, message: &Message) -> Result<(), RepoError> {
    sqlx::query(&format!(
        r#"INSERT INTO messaging.messages ({SELECT_COLUMNS})
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)"#
    ))
    .bind(message.id)
    .bind(message.organization_id)
    .bind(message.channel_id)
    .bind(direction_as_str(message.direction))
    .bind(&message.to_phone)
    .bind(&message.from_phone)
    .bind(message.template_id)
    .bind(&message.content)
    .bind(&message.content_hash)
    .bind(status_as_str(message.status))
    .bind(&message.whatsapp_message_id)
    .bind(&message.idempotency_key)
    .bind(&message.error_code)
    .bind(message.retry_count)
    .bind(message.created_at)
    .bind(message.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub async fn get_by_id(
    conn: &mut PgConnection,
    organization_id: Uuid,
    id: Uuid,
) -> Result<Option<Message>, RepoError> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messaging.messages WHERE id = $1 AND organization_id = $2"
    ))
    .bind(id)
    .bind(organization_id)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(from_row))
}

pub async fn get_by_idempotency_key(
    conn: &mut PgConnection,
    organization_id: Uuid,
    channel_id: Uuid,
    idempotency_key: &str,
) -> Result<Option<Message>, RepoError> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messaging.messages
         WHERE organization_id = $1 AND channel_id = $2 AND idempotency_key = $3"
    ))
    .bind(organization_id)
    .bind(channel_id)
    .bind(idempotency_key)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(from_row))
}

pub async fn get_by_whatsapp_message_id(
    conn: &mut PgConnection,
    whatsapp_message_id: &str,
) -> Result<Option<Message>, RepoError> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messaging.messages WHERE whatsapp_message_id = $1"
    ))
    .bind(whatsapp_message_id)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(from_row))
}

pub async fn find_all(
    conn: &mut PgConnection,
    organization_id: Uuid,
    page: Page,
) -> Result<Vec<Message>, RepoError> {
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messaging.messages WHERE organization_id = $1
         ORDER BY created_at DESC OFFSET $2 LIMIT $3"
    ))
    .bind(organization_id)
    .bind(page.skip)
    .bind(page.limit)
    .fetch_all(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(rows.into_iter().map(from_row).collect())
}

pub async fn update(conn: &mut PgConnection, message: &Message) -> Result<(), RepoError> {
    let result = sqlx::query(
        r#"UPDATE messaging.messages
           SET status = $2, whatsapp_message_id = $3, error_code = $4, retry_count = $5,
               updated_at = $6
           WHERE id = $1"#,
    )
    .bind(message.id)
    .bind(status_as_str(message.status))
    .bind(&message.whatsapp_message_id)
    .bind(&message.error_code)
    .bind(message.retry_count)
    .bind(message.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

/// Tracks the most recent inbound message time per counterparty phone
/// number, backing the 24-hour customer-service-window check in the send
/// pipeline. Called after persisting an inbound message.
pub async fn touch_conversation_window(
    conn: &mut PgConnection,
    organization_id: Uuid,
    channel_id: Uuid,
    customer_phone: &str,
    occurred_at: DateTime<Utc>,
) -> Result<(), RepoError> {
    sqlx::query(
        r#"INSERT INTO messaging.conversation_windows (organization_id, channel_id, customer_phone, last_inbound_at)
           VALUES ($1,$2,$3,$4)
           ON CONFLICT (organization_id, channel_id, customer_phone)
           DO UPDATE SET last_inbound_at = GREATEST(messaging.conversation_windows.last_inbound_at, EXCLUDED.last_inbound_at)"#,
    )
    .bind(organization_id)
    .bind(channel_id)
    .bind(customer_phone)
    .bind(occurred_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub async fn last_inbound_time(
    conn: &mut PgConnection,
    organization_id: Uuid,
    channel_id: Uuid,
    customer_phone: &str,
) -> Result<Option<DateTime<Utc>>, RepoError> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        "SELECT last_inbound_at FROM messaging.conversation_windows
         WHERE organization_id = $1 AND channel_id = $2 AND customer_phone = $3",
    )
    .bind(organization_id)
    .bind(channel_id)
    .bind(customer_phone)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(|(t,)| t))
}
