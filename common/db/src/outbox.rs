use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, Row};
use uuid::Uuid;

use crate::error::RepoError;
use crate::events::DomainEvent;
use crate::repository::map_sqlx_error;

const MAX_RETRIES: i32 = 5;

/// A domain event, flattened to its outbox row shape, ready to be inserted
/// in the same transaction as the business mutation that produced it.
pub struct OutboxDraft {
    pub aggregate_id: Uuid,
    pub aggregate_type: &'static str,
    pub event_type: &'static str,
    pub payload: Value,
    pub organization_id: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl OutboxDraft {
    pub fn from_event(event: &dyn DomainEvent) -> Self {
        Self {
            aggregate_id: event.aggregate_id(),
            aggregate_type: event.aggregate_type(),
            event_type: event.event_type(),
            payload: event.payload(),
            organization_id: event.organization_id(),
            scheduled_at: None,
        }
    }
}

/// Inserts an outbox row. Must be called with the same transaction that
/// performs the business mutation — never committed separately.
pub async fn write_event(conn: &mut PgConnection, draft: &OutboxDraft) -> Result<Uuid, RepoError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO shared.outbox_events
            (id, aggregate_id, aggregate_type, event_type, payload, organization_id, occurred_at, scheduled_at, retry_count)
           VALUES ($1, $2, $3, $4, $5, $6, now(), $7, 0)"#,
    )
    .bind(id)
    .bind(draft.aggregate_id)
    .bind(draft.aggregate_type)
    .bind(draft.event_type)
    .bind(&draft.payload)
    .bind(draft.organization_id)
    .bind(draft.scheduled_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct PendingOutboxRow {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: Value,
    pub organization_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub retry_count: i32,
}

impl FromRow<'_, PgRow> for PendingOutboxRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            organization_id: row.try_get("organization_id")?,
            occurred_at: row.try_get("occurred_at")?,
            retry_count: row.try_get("retry_count")?,
        })
    }
}

/// Claims up to `limit` pending rows for processing, locking them with
/// `FOR UPDATE SKIP LOCKED` so multiple worker instances can poll
/// concurrently without contending on the same rows.
pub async fn claim_pending(
    conn: &mut PgConnection,
    limit: i64,
) -> Result<Vec<PendingOutboxRow>, RepoError> {
    sqlx::query_as::<_, PendingOutboxRow>(
        r#"SELECT id, aggregate_id, aggregate_type, event_type, payload, organization_id, occurred_at, retry_count
           FROM shared.outbox_events
           WHERE processed_at IS NULL
             AND (scheduled_at IS NULL OR scheduled_at <= now())
             AND retry_count < $1
           ORDER BY occurred_at ASC
           LIMIT $2
           FOR UPDATE SKIP LOCKED"#,
    )
    .bind(MAX_RETRIES)
    .bind(limit)
    .fetch_all(conn)
    .await
    .map_err(map_sqlx_error)
}

pub async fn mark_processed(conn: &mut PgConnection, id: Uuid) -> Result<(), RepoError> {
    sqlx::query("UPDATE shared.outbox_events SET processed_at = now() WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

/// Exponential backoff in seconds: `min(2^retry_count, 3600)`.
pub fn backoff_seconds(retry_count: i32) -> i64 {
    2i64.saturating_pow(retry_count.max(0) as u32).min(3600)
}

pub async fn mark_failed(
    conn: &mut PgConnection,
    id: Uuid,
    retry_count: i32,
    error_message: &str,
) -> Result<(), RepoError> {
    let next_retry = retry_count + 1;
    let delay = backoff_seconds(next_retry);
    sqlx::query(
        r#"UPDATE shared.outbox_events
           SET retry_count = $2, last_error = $3, scheduled_at = now() + make_interval(secs => $4)
           WHERE id = $1"#,
    )
    .bind(id)
    .bind(next_retry)
    .bind(error_message)
    .bind(delay as f64)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_one_hour() {
        assert_eq!(backoff_seconds(0), 1);
        assert_eq!(backoff_seconds(5), 32);
        assert_eq!(backoff_seconds(20), 3600);
    }
}
