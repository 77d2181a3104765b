use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common_db::{FilterValue, Mapper, OrderBy, Page, RepoError, Repository, TenantContext};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::api_key::ApiKey;
use crate::domain::permission::Permission;

#[derive(sqlx::FromRow)]
pub struct ApiKeyRow {
    id: Uuid,
    organization_id: Uuid,
    user_id: Option<Uuid>,
    name: String,
    key_hash: String,
    key_prefix: String,
    permissions: Vec<String>,
    last_used_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

/// Binds `ApiKey` onto `identity.api_keys` for the generic repository base.
pub struct ApiKeyMapper;

impl Mapper for ApiKeyMapper {
    type Entity = ApiKey;
    type Row = ApiKeyRow;

    const TABLE: &'static str = "identity.api_keys";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "organization_id",
        "user_id",
        "name",
        "key_hash",
        "key_prefix",
        "permissions",
        "last_used_at",
        "expires_at",
        "is_active",
        "revoked_at",
        "created_at",
    ];
    const TENANT_SCOPED: bool = true;

    fn to_domain(row: Self::Row) -> Result<Self::Entity, RepoError> {
        let permissions = row
            .permissions
            .iter()
            .map(|p| Permission::parse(p).map_err(|e| RepoError::Storage(e.to_string())))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ApiKey {
            id: row.id,
            organization_id: row.organization_id,
            user_id: row.user_id,
            name: row.name,
            key_hash: row.key_hash,
            key_prefix: row.key_prefix,
            permissions,
            last_used_at: row.last_used_at,
            expires_at: row.expires_at,
            is_active: row.is_active,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
        })
    }

    fn id(entity: &Self::Entity) -> Uuid {
        entity.id
    }

    fn bind_insert<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
        entity: &'q Self::Entity,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        let perms: Vec<String> = entity.permissions.iter().map(|p| p.as_str().to_string()).collect();
        query
            .bind(entity.id)
            .bind(entity.organization_id)
            .bind(entity.user_id)
            .bind(&entity.name)
            .bind(&entity.key_hash)
            .bind(&entity.key_prefix)
            .bind(perms)
            .bind(entity.last_used_at)
            .bind(entity.expires_at)
            .bind(entity.is_active)
            .bind(entity.revoked_at)
            .bind(entity.created_at)
    }

    fn bind_update<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
        entity: &'q Self::Entity,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        let perms: Vec<String> = entity.permissions.iter().map(|p| p.as_str().to_string()).collect();
        query
            .bind(entity.id)
            .bind(entity.organization_id)
            .bind(entity.user_id)
            .bind(&entity.name)
            .bind(&entity.key_hash)
            .bind(&entity.key_prefix)
            .bind(perms)
            .bind(entity.last_used_at)
            .bind(entity.expires_at)
            .bind(entity.is_active)
            .bind(entity.revoked_at)
            .bind(entity.created_at)
    }
}

pub async fn add(conn: &mut PgConnection, key: &ApiKey) -> Result<(), RepoError> {
    let ctx = TenantContext::new(key.organization_id);
    Repository::<ApiKeyMapper>::add(conn, Some(&ctx), key).await
}

/// Looks up an API key by its hash across all tenants; used on the
/// incoming-request auth path before a tenant context can be established.
pub async fn get_by_hash(conn: &mut PgConnection, key_hash: &str) -> Result<Option<ApiKey>, RepoError> {
    let admin = TenantContext::new(Uuid::nil()).with_roles(vec!["system".to_string()]);
    Repository::<ApiKeyMapper>::find_one(conn, Some(&admin), &[("key_hash", FilterValue::Text(key_hash.to_string()))]).await
}

pub async fn find_all(conn: &mut PgConnection, ctx: &TenantContext) -> Result<Vec<ApiKey>, RepoError> {
    Repository::<ApiKeyMapper>::find_all(conn, Some(ctx), &[], Page::new(0, 500), Some(OrderBy::desc("created_at"))).await
}

pub async fn update(conn: &mut PgConnection, key: &ApiKey) -> Result<(), RepoError> {
    let ctx = TenantContext::new(key.organization_id);
    Repository::<ApiKeyMapper>::update(conn, Some(&ctx), key).await
}
