use chrono::{DateTime, Utc};
use common_db::{map_sqlx_error, Page, RepoError};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::template::{Template, TemplateStatus};

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    organization_id: Uuid,
    channel_id: Uuid,
    name: String,
    language: String,
    category: String,
    body: String,
    variables: Vec<String>,
    status: String,
    provider_template_id: Option<String>,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn status_from_str(s: &str) -> TemplateStatus {
    match s {
        "pending" => TemplateStatus::Pending,
        "approved" => TemplateStatus::Approved,
        "rejected" => TemplateStatus::Rejected,
        _ => TemplateStatus::Draft,
    }
}

fn status_as_str(status: TemplateStatus) -> &'static str {
    match status {
        TemplateStatus::Draft => "draft",
        TemplateStatus::Pending => "pending",
        TemplateStatus::Approved => "approved",
        TemplateStatus::Rejected => "rejected",
    }
}

fn from_row(row: TemplateRow) -> Template {
    Template {
        id: row.id,
        organization_id: row.organization_id,
        channel_id: row.channel_id,
        name: row.name,
        language: row.language,
        category: row.category,
        body: row.body,
        variables: row.variables,
        status: status_from_str(&row.status),
        provider_template_id: row.provider_template_id,
        rejection_reason: row.rejection_reason,
        created_at: row.created_at,
        updated_at: row.updated_at,
        events: Default::default(),
    }
}

const SELECT_COLUMNS: &str = "id, organization_id, channel_id, name, language, category, body, \
     variables, status, provider_template_id, rejection_reason, created_at, updated_at";

pub async fn add(conn: &mut PgConnection, template: &Template) -> Result<(), RepoError> {
    sqlx::query(&format!(
        r#"INSERT INTO messaging.templates ({SELECT_COLUMNS})
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)"#
    ))
    .bind(template.id)
    .bind(template.organization_id)
    .bind(template.channel_id)
    .bind(&template.name)
    .bind(&template.language)
    .bind(&template.category)
    .bind(&template.body)
    .bind(&template.variables)
    .bind(status_as_str(template.status))
    .bind(&template.provider_template_id)
    .bind(&template.rejection_reason)
    .bind(template.created_at)
    .bind(template.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub async fn get_by_id(
    conn: &mut PgConnection,
    organization_id: Uuid,
    id: Uuid,
) -> Result<Option<Template>, RepoError> {
    let row = sqlx::query_as::<_, TemplateRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messaging.templates WHERE id = $1 AND organization_id = $2"
    ))
    .bind(id)
    .bind(organization_id)
    .fetch_optional(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(from_row))
}

pub async fn find_all(
    conn: &mut PgConnection,
    organization_id: Uuid,
    page: Page,
) -> Result<Vec<Template>, RepoError> {
    let rows = sqlx::query_as::<_, TemplateRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messaging.templates WHERE organization_id = $1
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

pub async fn update(conn: &mut PgConnection, template: &Template) -> Result<(), RepoError> {
    let result = sqlx::query(
        r#"UPDATE messaging.templates
           SET status = $2, provider_template_id = $3, rejection_reason = $4, updated_at = $5
           WHERE id = $1"#,
    )
    .bind(template.id)
    .bind(status_as_str(template.status))
    .bind(&template.provider_template_id)
    .bind(&template.rejection_reason)
    .bind(template.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}
