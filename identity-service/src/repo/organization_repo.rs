use chrono::{DateTime, Utc};
use common_db::{map_sqlx_error, Page, RepoError};
use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::organization::{Organization, OrganizationMetadata};

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    slug: String,
    industry: Option<String>,
    timezone: Option<String>,
    language: Option<String>,
    branding: Value,
    features: Value,
    limits: Value,
    is_active: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn from_row(row: OrganizationRow) -> Organization {
    Organization {
        id: row.id,
        name: row.name,
        slug: row.slug,
        industry: row.industry,
        metadata: OrganizationMetadata {
            timezone: row.timezone,
            language: row.language,
            branding: row.branding,
            features: row.features,
            limits: row.limits,
        },
        is_active: row.is_active,
        deleted_at: row.deleted_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
        events: Default::default(),
    }
}

const SELECT_COLUMNS: &str = "id, name, slug, industry, timezone, language, branding, features, limits, \
     is_active, deleted_at, created_at, updated_at";

pub async fn add(conn: &mut PgConnection, org: &Organization) -> Result<(), RepoError> {
    sqlx::query(&format!(
        r#"INSERT INTO identity.organizations ({SELECT_COLUMNS})
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)"#
    ))
    .bind(org.id)
    .bind(&org.name)
    .bind(&org.slug)
    .bind(&org.industry)
    .bind(&org.metadata.timezone)
    .bind(&org.metadata.language)
    .bind(&org.metadata.branding)
    .bind(&org.metadata.features)
    .bind(&org.metadata.limits)
    .bind(org.is_active)
    .bind(org.deleted_at)
    .bind(org.created_at)
    .bind(org.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub async fn get_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Organization>, RepoError> {
    let row = sqlx::query_as::<_, OrganizationRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM identity.organizations WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(from_row))
}

pub async fn get_by_slug(conn: &mut PgConnection, slug: &str) -> Result<Option<Organization>, RepoError> {
    let row = sqlx::query_as::<_, OrganizationRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM identity.organizations WHERE slug = $1 AND deleted_at IS NULL"
    ))
    .bind(slug)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(from_row))
}

pub async fn find_all(conn: &mut PgConnection, page: Page) -> Result<Vec<Organization>, RepoError> {
    let rows = sqlx::query_as::<_, OrganizationRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM identity.organizations WHERE deleted_at IS NULL
         ORDER BY created_at DESC OFFSET $1 LIMIT $2"
    ))
    .bind(page.skip)
    .bind(page.limit)
    .fetch_all(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(rows.into_iter().map(from_row).collect())
}

pub async fn update(conn: &mut PgConnection, org: &Organization) -> Result<(), RepoError> {
    let result = sqlx::query(
        r#"UPDATE identity.organizations
           SET name = $2, industry = $3, timezone = $4, language = $5, branding = $6,
               features = $7, limits = $8, is_active = $9, deleted_at = $10, updated_at = $11
           WHERE id = $1"#,
    )
    .bind(org.id)
    .bind(&org.name)
    .bind(&org.industry)
    .bind(&org.metadata.timezone)
    .bind(&org.metadata.language)
    .bind(&org.metadata.branding)
    .bind(&org.metadata.features)
    .bind(&org.metadata.limits)
    .bind(org.is_active)
    .bind(org.deleted_at)
    .bind(org.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub async fn exists_with_slug(conn: &mut PgConnection, slug: &str) -> Result<bool, RepoError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM identity.organizations WHERE slug = $1 AND deleted_at IS NULL")
            .bind(slug)
            .fetch_optional(conn)
            .await
            .map_err(map_sqlx_error)?;
    Ok(row.is_some())
}
