use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common_db::{map_sqlx_error, RepoError, TenantContext};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::permission::Permission;
use crate::domain::role::{Role, UserRole};

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    description: Option<String>,
    permissions: Vec<String>,
    is_system: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn from_row(row: RoleRow) -> Result<Role, RepoError> {
    let permissions = row
        .permissions
        .iter()
        .map(|p| Permission::parse(p).map_err(|e| RepoError::Storage(e.to_string())))
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(Role {
        id: row.id,
        organization_id: row.organization_id,
        name: row.name,
        description: row.description,
        permissions,
        is_system: row.is_system,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

const SELECT_COLUMNS: &str =
    "id, organization_id, name, description, permissions, is_system, created_at, updated_at";

pub async fn add(conn: &mut PgConnection, role: &Role) -> Result<(), RepoError> {
    let perms = role.permission_strings();
    sqlx::query(&format!(
        "INSERT INTO identity.roles ({SELECT_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)"
    ))
    .bind(role.id)
    .bind(role.organization_id)
    .bind(&role.name)
    .bind(&role.description)
    .bind(&perms)
    .bind(role.is_system)
    .bind(role.created_at)
    .bind(role.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub async fn get_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Role>, RepoError> {
    let row: Option<RoleRow> =
        sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM identity.roles WHERE id = $1"))
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(map_sqlx_error)?;
    row.map(from_row).transpose()
}

pub async fn find_all(conn: &mut PgConnection, ctx: &TenantContext) -> Result<Vec<Role>, RepoError> {
    let rows: Vec<RoleRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM identity.roles WHERE organization_id = $1 ORDER BY name"
    ))
    .bind(ctx.tenant_id)
    .fetch_all(conn)
    .await
    .map_err(map_sqlx_error)?;
    rows.into_iter().map(from_row).collect()
}

pub async fn update(conn: &mut PgConnection, role: &Role) -> Result<(), RepoError> {
    let perms = role.permission_strings();
    let result = sqlx::query(
        "UPDATE identity.roles SET description = $2, permissions = $3, updated_at = $4 WHERE id = $1",
    )
    .bind(role.id)
    .bind(&role.description)
    .bind(&perms)
    .bind(role.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub async fn exists_with_name(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    name: &str,
) -> Result<bool, RepoError> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM identity.roles WHERE organization_id = $1 AND name = $2",
    )
    .bind(ctx.tenant_id)
    .bind(name)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.is_some())
}

pub async fn assign(conn: &mut PgConnection, user_role: &UserRole) -> Result<(), RepoError> {
    sqlx::query(
        "INSERT INTO identity.user_roles (user_id, role_id, granted_at, granted_by) VALUES ($1,$2,$3,$4)
         ON CONFLICT (user_id, role_id) DO NOTHING",
    )
    .bind(user_role.user_id)
    .bind(user_role.role_id)
    .bind(user_role.granted_at)
    .bind(user_role.granted_by)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub async fn revoke(conn: &mut PgConnection, user_id: Uuid, role_id: Uuid) -> Result<(), RepoError> {
    sqlx::query("DELETE FROM identity.user_roles WHERE user_id = $1 AND role_id = $2")
        .bind(user_id)
        .bind(role_id)
        .execute(conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

pub async fn roles_for_user(conn: &mut PgConnection, user_id: Uuid) -> Result<Vec<Role>, RepoError> {
    let rows: Vec<RoleRow> = sqlx::query_as(&format!(
        "SELECT r.id, r.organization_id, r.name, r.description, r.permissions, r.is_system, r.created_at, r.updated_at
         FROM identity.roles r
         JOIN identity.user_roles ur ON ur.role_id = r.id
         WHERE ur.user_id = $1"
    ))
    .bind(user_id)
    .fetch_all(conn)
    .await
    .map_err(map_sqlx_error)?;
    rows.into_iter().map(from_row).collect()
}

/// Union of permission strings across every role assigned to the user.
pub async fn effective_permissions(conn: &mut PgConnection, user_id: Uuid) -> Result<Vec<String>, RepoError> {
    let roles = roles_for_user(conn, user_id).await?;
    let mut set: BTreeSet<String> = BTreeSet::new();
    for role in roles {
        set.extend(role.permission_strings());
    }
    Ok(set.into_iter().collect())
}
