use chrono::{DateTime, Utc};
use common_db::{map_sqlx_error, RepoError};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::single_use_token::{SingleUseToken, SingleUseTokenKind};

#[derive(sqlx::FromRow)]
struct SingleUseTokenRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    token_hash: String,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

fn kind_to_str(kind: SingleUseTokenKind) -> &'static str {
    match kind {
        SingleUseTokenKind::EmailVerification => "email_verification",
        SingleUseTokenKind::PasswordReset => "password_reset",
    }
}

fn kind_from_str(s: &str) -> Result<SingleUseTokenKind, RepoError> {
    match s {
        "email_verification" => Ok(SingleUseTokenKind::EmailVerification),
        "password_reset" => Ok(SingleUseTokenKind::PasswordReset),
        other => Err(RepoError::Storage(format!("unknown single-use token kind: {other}"))),
    }
}

fn from_row(row: SingleUseTokenRow) -> Result<SingleUseToken, RepoError> {
    Ok(SingleUseToken {
        id: row.id,
        user_id: row.user_id,
        kind: kind_from_str(&row.kind)?,
        token_hash: row.token_hash,
        expires_at: row.expires_at,
        used_at: row.used_at,
        created_at: row.created_at,
    })
}

pub async fn add(conn: &mut PgConnection, token: &SingleUseToken) -> Result<(), RepoError> {
    sqlx::query(
        "INSERT INTO identity.single_use_tokens (id, user_id, kind, token_hash, expires_at, used_at, created_at)
         VALUES ($1,$2,$3,$4,$5,$6,$7)",
    )
    .bind(token.id)
    .bind(token.user_id)
    .bind(kind_to_str(token.kind))
    .bind(&token.token_hash)
    .bind(token.expires_at)
    .bind(token.used_at)
    .bind(token.created_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub async fn get_by_hash_for_update(
    conn: &mut PgConnection,
    token_hash: &str,
) -> Result<Option<SingleUseToken>, RepoError> {
    let row: Option<SingleUseTokenRow> = sqlx::query_as(
        "SELECT id, user_id, kind, token_hash, expires_at, used_at, created_at
         FROM identity.single_use_tokens WHERE token_hash = $1 FOR UPDATE",
    )
    .bind(token_hash)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    row.map(from_row).transpose()
}

pub async fn mark_used(conn: &mut PgConnection, id: Uuid) -> Result<(), RepoError> {
    let result = sqlx::query(
        "UPDATE identity.single_use_tokens SET used_at = now() WHERE id = $1 AND used_at IS NULL",
    )
    .bind(id)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(RepoError::Conflict);
    }
    Ok(())
}
