use chrono::{DateTime, Utc};
use common_db::{map_sqlx_error, RepoError};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::refresh_token::RefreshToken;

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

fn from_row(row: RefreshTokenRow) -> RefreshToken {
    RefreshToken {
        id: row.id,
        user_id: row.user_id,
        token_hash: row.token_hash,
        expires_at: row.expires_at,
        revoked_at: row.revoked_at,
        created_at: row.created_at,
    }
}

pub async fn add(conn: &mut PgConnection, token: &RefreshToken) -> Result<(), RepoError> {
    sqlx::query(
        "INSERT INTO identity.refresh_tokens (id, user_id, token_hash, expires_at, revoked_at, created_at)
         VALUES ($1,$2,$3,$4,$5,$6)",
    )
    .bind(token.id)
    .bind(token.user_id)
    .bind(&token.token_hash)
    .bind(token.expires_at)
    .bind(token.revoked_at)
    .bind(token.created_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

/// Looks up and locks a refresh token row by hash within the caller's
/// transaction, so the subsequent revoke-and-rotate is atomic against
/// concurrent refresh attempts with the same token.
pub async fn get_by_hash_for_update(
    conn: &mut PgConnection,
    token_hash: &str,
) -> Result<Option<RefreshToken>, RepoError> {
    let row: Option<RefreshTokenRow> = sqlx::query_as(
        "SELECT id, user_id, token_hash, expires_at, revoked_at, created_at
         FROM identity.refresh_tokens WHERE token_hash = $1 FOR UPDATE",
    )
    .bind(token_hash)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(from_row))
}

pub async fn revoke(conn: &mut PgConnection, id: Uuid) -> Result<(), RepoError> {
    sqlx::query("UPDATE identity.refresh_tokens SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL")
        .bind(id)
        .execute(conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

/// Revokes every active refresh token for a user. Used on password change,
/// account deactivation, and detected token-family compromise.
pub async fn revoke_all_for_user(conn: &mut PgConnection, user_id: Uuid) -> Result<u64, RepoError> {
    let result = sqlx::query(
        "UPDATE identity.refresh_tokens SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL",
    )
    .bind(user_id)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(result.rows_affected())
}
