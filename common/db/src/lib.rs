pub mod error;
pub mod events;
pub mod outbox;
pub mod repository;
pub mod tenant;
pub mod uow;

pub use error::RepoError;
pub use events::{DomainEvent, EventBuffer};
pub use outbox::{OutboxDraft, PendingOutboxRow};
pub use repository::{
    allows_admin_bypass, map_sqlx_error, require_tenant_context, Filter, FilterValue, Mapper, OrderBy, Page,
    Repository,
};
pub use tenant::TenantContext;
pub use uow::UnitOfWork;
