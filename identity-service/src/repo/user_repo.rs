use chrono::{DateTime, Utc};
use common_db::{allows_admin_bypass, map_sqlx_error, require_tenant_context, Page, RepoError, TenantContext};
use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::email::Email;
use crate::domain::password::PasswordHash;
use crate::domain::phone::Phone;
use crate::domain::user::User;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    organization_id: Uuid,
    email: String,
    phone: Option<String>,
    password_hash: String,
    full_name: String,
    is_active: bool,
    email_verified: bool,
    phone_verified: bool,
    last_login_at: Option<DateTime<Utc>>,
    failed_login_attempts: i16,
    locked_until: Option<DateTime<Utc>>,
    mfa_secret: Option<String>,
    mfa_pending_secret: Option<String>,
    mfa_enrolled_at: Option<DateTime<Utc>>,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn from_row(row: UserRow) -> Result<User, RepoError> {
    Ok(User {
        id: row.id,
        organization_id: row.organization_id,
        email: Email::parse(&row.email).map_err(|e| RepoError::Storage(e.to_string()))?,
        phone: row
            .phone
            .map(|p| Phone::parse(&p))
            .transpose()
            .map_err(|e| RepoError::Storage(e.to_string()))?,
        password_hash: PasswordHash::from_stored(row.password_hash)
            .map_err(|e| RepoError::Storage(e.to_string()))?,
        full_name: row.full_name,
        is_active: row.is_active,
        email_verified: row.email_verified,
        phone_verified: row.phone_verified,
        last_login_at: row.last_login_at,
        failed_login_attempts: row.failed_login_attempts,
        locked_until: row.locked_until,
        mfa_secret: row.mfa_secret,
        mfa_pending_secret: row.mfa_pending_secret,
        mfa_enrolled_at: row.mfa_enrolled_at,
        metadata: row.metadata,
        created_at: row.created_at,
        updated_at: row.updated_at,
        events: Default::default(),
    })
}

const SELECT_COLUMNS: &str = "id, organization_id, email, phone, password_hash, full_name, is_active, \
     email_verified, phone_verified, last_login_at, failed_login_attempts, locked_until, mfa_secret, \
     mfa_pending_secret, mfa_enrolled_at, metadata, created_at, updated_at";

pub async fn add(conn: &mut PgConnection, user: &User) -> Result<(), RepoError> {
    sqlx::query(&format!(
        "INSERT INTO identity.users ({SELECT_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)"
    ))
    .bind(user.id)
    .bind(user.organization_id)
    .bind(user.email.as_str())
    .bind(user.phone.as_ref().map(|p| p.as_str()))
    .bind(user.password_hash.as_str())
    .bind(&user.full_name)
    .bind(user.is_active)
    .bind(user.email_verified)
    .bind(user.phone_verified)
    .bind(user.last_login_at)
    .bind(user.failed_login_attempts)
    .bind(user.locked_until)
    .bind(&user.mfa_secret)
    .bind(&user.mfa_pending_secret)
    .bind(user.mfa_enrolled_at)
    .bind(&user.metadata)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub async fn get_by_id(
    conn: &mut PgConnection,
    ctx: Option<&TenantContext>,
    id: Uuid,
) -> Result<Option<User>, RepoError> {
    let row: Option<UserRow> = if allows_admin_bypass(ctx) {
        sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM identity.users WHERE id = $1"))
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(map_sqlx_error)?
    } else {
        let ctx = require_tenant_context(ctx)?;
        sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM identity.users WHERE id = $1 AND organization_id = $2"
        ))
        .bind(id)
        .bind(ctx.tenant_id)
        .fetch_optional(conn)
        .await
        .map_err(map_sqlx_error)?
    };
    row.map(from_row).transpose()
}

/// Login looks up a user by email across the whole platform before a tenant
/// is known; this is the one path that legitimately bypasses tenant
/// scoping by construction rather than via `allows_admin_bypass`.
pub async fn get_by_email_global(conn: &mut PgConnection, email: &Email) -> Result<Option<User>, RepoError> {
    let row: Option<UserRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM identity.users WHERE email = $1"
    ))
    .bind(email.as_str())
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    row.map(from_row).transpose()
}

pub async fn find_all(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    page: Page,
) -> Result<Vec<User>, RepoError> {
    let rows: Vec<UserRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM identity.users WHERE organization_id = $1
         ORDER BY created_at DESC OFFSET $2 LIMIT $3"
    ))
    .bind(ctx.tenant_id)
    .bind(page.skip)
    .bind(page.limit)
    .fetch_all(conn)
    .await
    .map_err(map_sqlx_error)?;
    rows.into_iter().map(from_row).collect()
}

pub async fn update(conn: &mut PgConnection, user: &User) -> Result<(), RepoError> {
    let result = sqlx::query(
        r#"UPDATE identity.users
           SET phone = $2, password_hash = $3, full_name = $4, is_active = $5, email_verified = $6,
               phone_verified = $7, last_login_at = $8, failed_login_attempts = $9, locked_until = $10,
               mfa_secret = $11, mfa_pending_secret = $12, mfa_enrolled_at = $13, metadata = $14, updated_at = $15
           WHERE id = $1"#,
    )
    .bind(user.id)
    .bind(user.phone.as_ref().map(|p| p.as_str()))
    .bind(user.password_hash.as_str())
    .bind(&user.full_name)
    .bind(user.is_active)
    .bind(user.email_verified)
    .bind(user.phone_verified)
    .bind(user.last_login_at)
    .bind(user.failed_login_attempts)
    .bind(user.locked_until)
    .bind(&user.mfa_secret)
    .bind(&user.mfa_pending_secret)
    .bind(user.mfa_enrolled_at)
    .bind(&user.metadata)
    .bind(user.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub async fn exists_with_email(conn: &mut PgConnection, email: &Email) -> Result<bool, RepoError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM identity.users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(row.is_some())
}
