use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::model::AuditError;

/// Writes the durable `AuditLog` row. This is the system of record; the
/// Kafka sink in `producer` is a best-effort mirror only and must never be
/// treated as a substitute for this call.
#[allow(clippy::too_many_arguments)]
pub async fn record(
    conn: &mut PgConnection,
    organization_id: Option<Uuid>,
    user_id: Option<Uuid>,
    action: &str,
    resource_type: Option<&str>,
    resource_id: Option<Uuid>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    metadata: Value,
) -> Result<Uuid, AuditError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO identity.audit_log
            (id, organization_id, user_id, action, resource_type, resource_id, ip_address, user_agent, metadata, created_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())"#,
    )
    .bind(id)
    .bind(organization_id)
    .bind(user_id)
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(ip_address)
    .bind(user_agent)
    .bind(metadata)
    .execute(conn)
    .await
    .map_err(|e| AuditError::Storage(e.to_string()))?;
    Ok(id)
}
