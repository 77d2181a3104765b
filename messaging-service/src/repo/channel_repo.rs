use chrono::{DateTime, Utc};
use common_db::{map_sqlx_error, Page, RepoError};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::channel::Channel;

#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: Uuid,
    organization_id: Uuid,
    phone_number_id: String,
    business_phone: String,
    encrypted_access_token: Vec<u8>,
    encrypted_webhook_secret: Vec<u8>,
    encrypted_dek: Vec<u8>,
    rate_limit_per_second: i32,
    monthly_message_limit: i32,
    is_active: bool,
    is_suspended: bool,
    messages_sent_this_period: i64,
    usage_period_start: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn from_row(row: ChannelRow) -> Channel {
    Channel {
        id: row.id,
        organization_id: row.organization_id,
        phone_number_id: row.phone_number_id,
        business_phone: row.business_phone,
        encrypted_access_token: row.encrypted_access_token,
        encrypted_webhook_secret: row.encrypted_webhook_secret,
        encrypted_dek: row.encrypted_dek,
        rate_limit_per_second: row.rate_limit_per_second,
        monthly_message_limit: row.monthly_message_limit,
        is_active: row.is_active,
        is_suspended: row.is_suspended,
        messages_sent_this_period: row.messages_sent_this_period,
        usage_period_start: row.usage_period_start,
        created_at: row.created_at,
        updated_at: row.updated_at,
        events: Default::default(),
    }
}

const SELECT_COLUMNS: &str = "id, organization_id, phone_number_id, business_phone, \
     encrypted_access_token, encrypted_webhook_secret, encrypted_dek, rate_limit_per_second, \
     monthly_message_limit, is_active, is_suspended, messages_sent_this_period, \
     usage_period_start, created_at, updated_at";

pub async fn add(conn: &mut PgConnection, channel: &Channel) -> Result<(), RepoError> {
    sqlx::query(&format!(
        r#"INSERT INTO messaging.channels ({SELECT_COLUMNS})
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)"#
    ))
    .bind(channel.id)
    .bind(channel.organization_id)
    .bind(&channel.phone_number_id)
    .bind(&channel.business_phone)
    .bind(&channel.encrypted_access_token)
    .bind(&channel.encrypted_webhook_secret)
    .bind(&channel.encrypted_dek)
    .bind(channel.rate_limit_per_second)
    .bind(channel.monthly_message_limit)
    .bind(channel.is_active)
    .bind(channel.is_suspended)
    .bind(channel.messages_sent_this_period)
    .bind(channel.usage_period_start)
    .bind(channel.created_at)
    .bind(channel.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub async fn get_by_id(
    conn: &mut PgConnection,
    organization_id: Uuid,
    id: Uuid,
) -> Result<Option<Channel>, RepoError> {
    let row = sqlx::query_as::<_, ChannelRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messaging.channels WHERE id = $1 AND organization_id = $2"
    ))
    .bind(id)
    .bind(organization_id)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(from_row))
}

/// Webhook routes are addressed by channel id alone, with no tenant header
/// to scope against until the channel itself is loaded.
pub async fn get_by_id_unscoped(conn: &mut PgConnection, id: Uuid) -> Result<Option<Channel>, RepoError> {
    let row = sqlx::query_as::<_, ChannelRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messaging.channels WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(from_row))
}

/// Webhook processing looks channels up by provider phone number id alone,
/// before any tenant context is known.
pub async fn get_by_phone_number_id(
    conn: &mut PgConnection,
    phone_number_id: &str,
) -> Result<Option<Channel>, RepoError> {
    let row = sqlx::query_as::<_, ChannelRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messaging.channels WHERE phone_number_id = $1"
    ))
    .bind(phone_number_id)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(from_row))
}

pub async fn find_all(
    conn: &mut PgConnection,
    organization_id: Uuid,
    page: Page,
) -> Result<Vec<Channel>, RepoError> {
    let rows = sqlx::query_as::<_, ChannelRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messaging.channels WHERE organization_id = $1
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

pub async fn update(conn: &mut PgConnection, channel: &Channel) -> Result<(), RepoError> {
    let result = sqlx::query(
        r#"UPDATE messaging.channels
           SET business_phone = $2, encrypted_access_token = $3, encrypted_webhook_secret = $4,
               encrypted_dek = $5, rate_limit_per_second = $6, monthly_message_limit = $7,
               is_active = $8, is_suspended = $9, messages_sent_this_period = $10,
               usage_period_start = $11, updated_at = $12
           WHERE id = $1"#,
    )
    .bind(channel.id)
    .bind(&channel.business_phone)
    .bind(&channel.encrypted_access_token)
    .bind(&channel.encrypted_webhook_secret)
    .bind(&channel.encrypted_dek)
    .bind(channel.rate_limit_per_second)
    .bind(channel.monthly_message_limit)
    .bind(channel.is_active)
    .bind(channel.is_suspended)
    .bind(channel.messages_sent_this_period)
    .bind(channel.usage_period_start)
    .bind(channel.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub async fn delete(conn: &mut PgConnection, organization_id: Uuid, id: Uuid) -> Result<(), RepoError> {
    let result = sqlx::query("DELETE FROM messaging.channels WHERE id = $1 AND organization_id = $2")
        .bind(id)
        .bind(organization_id)
        .execute(conn)
        .await
        .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}
