use thiserror::Error;

/// Storage-layer error surfaced by repositories and the unit of work.
///
/// Command handlers translate this into domain-level error codes; nothing
/// above the repository/UoW boundary should see a raw `sqlx::Error`.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("unique constraint violated")]
    Conflict,
    #[error("row not found")]
    NotFound,
    #[error("tenant context missing for tenant-scoped operation")]
    TenantContextMissing,
    #[error("storage error: {0}")]
    Storage(String),
}
