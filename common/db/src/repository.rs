use std::marker::PhantomData;

use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::RepoError;
use crate::tenant::TenantContext;

/// Maps storage errors to the repository taxonomy. Unique-constraint
/// violations become `Conflict`; everything else is an opaque `Storage`
/// error. Row-not-found is handled by callers (`get_or_fail`-style
/// variants), not here, per the base repository's error policy.
pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return RepoError::Conflict;
        }
    }
    RepoError::Storage(err.to_string())
}

/// Every tenant-scoped repository method must call this before executing a
/// statement against a tenant-scoped table. Only an admin-scoped session
/// (carrying the `super_admin` or `system` role) may proceed without one.
pub fn require_tenant_context(
    ctx: Option<&TenantContext>,
) -> Result<&TenantContext, RepoError> {
    match ctx {
        Some(ctx) => Ok(ctx),
        None => Err(RepoError::TenantContextMissing),
    }
}

/// Checks whether the given roles permit omitting tenant context entirely
/// (e.g. the login lookup-by-email-across-tenants path in identity-service).
pub fn allows_admin_bypass(ctx: Option<&TenantContext>) -> bool {
    match ctx {
        Some(ctx) => TenantContext::is_admin_scope(&ctx.roles),
        None => false,
    }
}

/// Pagination parameters for `find_all`-style queries.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub skip: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip: skip.max(0),
            limit: limit.clamp(1, 500),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { skip: 0, limit: 50 }
    }
}

/// A single equality filter consumed by `find_one`/`find_all`/`count`/
/// `exists`. Filters always compose with `AND`; the base never builds
/// arbitrary boolean trees, matching the base repository's `filters: dict`
/// contract.
#[derive(Debug, Clone)]
pub enum FilterValue {
    Uuid(Uuid),
    Text(String),
    Bool(bool),
    Int(i64),
}

/// Column name paired with the value to match. `column` is always a
/// caller-supplied static string, never taken verbatim from a request body.
pub type Filter = (&'static str, FilterValue);

/// Sort column and direction for `find_all`. `column` is always a
/// caller-supplied static string (an internal sort key, never taken
/// verbatim from a request body), so it is safe to interpolate.
#[derive(Debug, Clone, Copy)]
pub struct OrderBy {
    pub column: &'static str,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: &'static str) -> Self {
        Self { column, descending: false }
    }

    pub fn desc(column: &'static str) -> Self {
        Self { column, descending: true }
    }
}

/// Maps a domain entity onto its stored row shape and back. The generic
/// `Repository` never exposes `Row` upward; only what `to_domain` returns
/// crosses the repository boundary.
///
/// `COLUMNS` must list `id` first; every other operation relies on that
/// ordering to line up `bind_insert`/`bind_update` with the generated SQL.
pub trait Mapper {
    type Entity: Send + Sync;
    type Row: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin;

    /// Fully-qualified table name, e.g. `"identity.api_keys"`.
    const TABLE: &'static str;
    /// Column list in insert order, `id` first.
    const COLUMNS: &'static [&'static str];
    /// Whether rows carry `organization_id` and must be filtered by tenant
    /// context (directly, not only via row-level security).
    const TENANT_SCOPED: bool;

    /// Converts a fetched row into the domain entity. Fallible: some
    /// mappings (enum parsing, invariant reconstruction) can fail on a row
    /// that violates an invariant added after it was written.
    fn to_domain(row: Self::Row) -> Result<Self::Entity, RepoError>;

    fn id(entity: &Self::Entity) -> Uuid;

    /// Binds `COLUMNS` onto an `INSERT ... VALUES ($1, $2, ...)` statement,
    /// in `COLUMNS` order.
    fn bind_insert<'q>(
        query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        entity: &'q Self::Entity,
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

    /// Binds an `UPDATE ... SET col2 = $2, ... WHERE id = $1` statement:
    /// `id` first (for `$1`), then every column in `COLUMNS[1..]` in order.
    fn bind_update<'q>(
        query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        entity: &'q Self::Entity,
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;
}

/// Generic CRUD over an ORM-mapped table, enforcing tenant-context presence
/// for tenant-scoped tables. Concrete repositories implement `Mapper` and
/// call through this for the shared operations; bespoke queries (joins,
/// composite-key lookups, raw partition scans) stay hand-written alongside
/// it, the same way the original base repository is subclassed rather than
/// replaced.
pub struct Repository<M: Mapper>(PhantomData<M>);

impl<M: Mapper> Repository<M> {
    fn check_tenant(ctx: Option<&TenantContext>) -> Result<(), RepoError> {
        if M::TENANT_SCOPED {
            require_tenant_context(ctx)?;
        }
        Ok(())
    }

    /// Appends ` AND organization_id = $n` (or ` WHERE ...` if nothing has
    /// been written to the clause yet) unless the session is admin-scoped.
    fn push_tenant_clause(qb: &mut QueryBuilder<'_, Postgres>, ctx: Option<&TenantContext>, started: &mut bool) {
        if !M::TENANT_SCOPED {
            return;
        }
        let Some(ctx) = ctx else { return };
        if allows_admin_bypass(Some(ctx)) {
            return;
        }
        qb.push(if *started { " AND organization_id = " } else { " WHERE organization_id = " });
        *started = true;
        qb.push_bind(ctx.tenant_id);
    }

    fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &[Filter], started: &mut bool) {
        for (column, value) in filters {
            qb.push(if *started { " AND " } else { " WHERE " });
            *started = true;
            qb.push(*column);
            qb.push(" = ");
            match value.clone() {
                FilterValue::Uuid(v) => qb.push_bind(v),
                FilterValue::Text(v) => qb.push_bind(v),
                FilterValue::Bool(v) => qb.push_bind(v),
                FilterValue::Int(v) => qb.push_bind(v),
            };
        }
    }

    pub async fn add(
        conn: &mut PgConnection,
        ctx: Option<&TenantContext>,
        entity: &M::Entity,
    ) -> Result<(), RepoError> {
        Self::check_tenant(ctx)?;
        let placeholders: Vec<String> = (1..=M::COLUMNS.len()).map(|i| format!("${i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            M::TABLE,
            M::COLUMNS.join(", "),
            placeholders.join(", ")
        );
        let query = M::bind_insert(sqlx::query(&sql), entity);
        query.execute(conn).await.map_err(map_sqlx_error)?;
        Ok(())
    }

    pub async fn get_by_id(
        conn: &mut PgConnection,
        ctx: Option<&TenantContext>,
        id: Uuid,
    ) -> Result<Option<M::Entity>, RepoError> {
        Self::check_tenant(ctx)?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM {} WHERE id = ", M::COLUMNS.join(", "), M::TABLE));
        qb.push_bind(id);
        let mut started = true;
        Self::push_tenant_clause(&mut qb, ctx, &mut started);
        let row: Option<M::Row> = qb.build_query_as().fetch_optional(conn).await.map_err(map_sqlx_error)?;
        row.map(M::to_domain).transpose()
    }

    pub async fn get_by_ids(
        conn: &mut PgConnection,
        ctx: Option<&TenantContext>,
        ids: &[Uuid],
    ) -> Result<Vec<M::Entity>, RepoError> {
        Self::check_tenant(ctx)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM {} WHERE id = ANY(", M::COLUMNS.join(", "), M::TABLE));
        qb.push_bind(ids.to_vec());
        qb.push(")");
        let mut started = true;
        Self::push_tenant_clause(&mut qb, ctx, &mut started);
        let rows: Vec<M::Row> = qb.build_query_as().fetch_all(conn).await.map_err(map_sqlx_error)?;
        rows.into_iter().map(M::to_domain).collect()
    }

    pub async fn find_one(
        conn: &mut PgConnection,
        ctx: Option<&TenantContext>,
        filters: &[Filter],
    ) -> Result<Option<M::Entity>, RepoError> {
        Self::check_tenant(ctx)?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM {}", M::COLUMNS.join(", "), M::TABLE));
        let mut started = false;
        Self::push_filters(&mut qb, filters, &mut started);
        Self::push_tenant_clause(&mut qb, ctx, &mut started);
        qb.push(" LIMIT 1");
        let row: Option<M::Row> = qb.build_query_as().fetch_optional(conn).await.map_err(map_sqlx_error)?;
        row.map(M::to_domain).transpose()
    }

    pub async fn find_all(
        conn: &mut PgConnection,
        ctx: Option<&TenantContext>,
        filters: &[Filter],
        page: Page,
        order_by: Option<OrderBy>,
    ) -> Result<Vec<M::Entity>, RepoError> {
        Self::check_tenant(ctx)?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM {}", M::COLUMNS.join(", "), M::TABLE));
        let mut started = false;
        Self::push_filters(&mut qb, filters, &mut started);
        Self::push_tenant_clause(&mut qb, ctx, &mut started);
        if let Some(order) = order_by {
            qb.push(" ORDER BY ");
            qb.push(order.column);
            qb.push(if order.descending { " DESC" } else { " ASC" });
        }
        qb.push(" OFFSET ");
        qb.push_bind(page.skip);
        qb.push(" LIMIT ");
        qb.push_bind(page.limit);
        let rows: Vec<M::Row> = qb.build_query_as().fetch_all(conn).await.map_err(map_sqlx_error)?;
        rows.into_iter().map(M::to_domain).collect()
    }

    pub async fn update(
        conn: &mut PgConnection,
        ctx: Option<&TenantContext>,
        entity: &M::Entity,
    ) -> Result<(), RepoError> {
        Self::check_tenant(ctx)?;
        let assignments: Vec<String> = M::COLUMNS
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, col)| format!("{col} = ${}", i + 1))
            .collect();
        let mut sql = format!("UPDATE {} SET {} WHERE id = $1", M::TABLE, assignments.join(", "));
        let mut tenant_param = None;
        if M::TENANT_SCOPED {
            if let Some(ctx) = ctx {
                if !allows_admin_bypass(Some(ctx)) {
                    sql.push_str(&format!(" AND organization_id = ${}", M::COLUMNS.len() + 1));
                    tenant_param = Some(ctx.tenant_id);
                }
            }
        }
        let query = M::bind_update(sqlx::query(&sql), entity);
        let query = match tenant_param {
            Some(tenant_id) => query.bind(tenant_id),
            None => query,
        };
        let result = query.execute(conn).await.map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    pub async fn delete(
        conn: &mut PgConnection,
        ctx: Option<&TenantContext>,
        id: Uuid,
    ) -> Result<(), RepoError> {
        Self::check_tenant(ctx)?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("DELETE FROM {} WHERE id = ", M::TABLE));
        qb.push_bind(id);
        let mut started = true;
        Self::push_tenant_clause(&mut qb, ctx, &mut started);
        let result = qb.build().execute(conn).await.map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_many(
        conn: &mut PgConnection,
        ctx: Option<&TenantContext>,
        filters: &[Filter],
    ) -> Result<u64, RepoError> {
        Self::check_tenant(ctx)?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("DELETE FROM {}", M::TABLE));
        let mut started = false;
        Self::push_filters(&mut qb, filters, &mut started);
        Self::push_tenant_clause(&mut qb, ctx, &mut started);
        let result = qb.build().execute(conn).await.map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    pub async fn count(
        conn: &mut PgConnection,
        ctx: Option<&TenantContext>,
        filters: &[Filter],
    ) -> Result<i64, RepoError> {
        Self::check_tenant(ctx)?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {}", M::TABLE));
        let mut started = false;
        Self::push_filters(&mut qb, filters, &mut started);
        Self::push_tenant_clause(&mut qb, ctx, &mut started);
        qb.build_query_scalar::<i64>().fetch_one(conn).await.map_err(map_sqlx_error)
    }

    pub async fn exists(
        conn: &mut PgConnection,
        ctx: Option<&TenantContext>,
        filters: &[Filter],
    ) -> Result<bool, RepoError> {
        Self::check_tenant(ctx)?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT EXISTS(SELECT 1 FROM {}", M::TABLE));
        let mut started = false;
        Self::push_filters(&mut qb, filters, &mut started);
        Self::push_tenant_clause(&mut qb, ctx, &mut started);
        qb.push(")");
        qb.build_query_scalar::<bool>().fetch_one(conn).await.map_err(map_sqlx_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_context_is_an_error() {
        assert!(matches!(
            require_tenant_context(None),
            Err(RepoError::TenantContextMissing)
        ));
    }

    #[test]
    fn present_context_passes_through() {
        let ctx = TenantContext::new(Uuid::new_v4());
        assert!(require_tenant_context(Some(&ctx)).is_ok());
    }

    #[test]
    fn page_clamps_limit() {
        let page = Page::new(-5, 10_000);
        assert_eq!(page.skip, 0);
        assert_eq!(page.limit, 500);
    }

    #[test]
    fn order_by_builders_set_direction() {
        assert!(OrderBy::desc("created_at").descending);
        assert!(!OrderBy::asc("created_at").descending);
    }
}
