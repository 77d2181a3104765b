use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::error::RepoError;
use crate::events::DomainEvent;
use crate::outbox::{write_event, OutboxDraft};
use crate::repository::map_sqlx_error;
use crate::tenant::TenantContext;

/// The transactional scope within which repositories operate and aggregates
/// collect events. Exactly one transaction per instance; non-`Clone`,
/// non-`Send` across unrelated tasks by construction (holding a live
/// `sqlx::Transaction` already prevents sharing the underlying connection).
pub struct UnitOfWork<'c> {
    tx: Transaction<'c, Postgres>,
    tenant: Option<TenantContext>,
    pending: Vec<OutboxDraft>,
    committed: bool,
}

impl<'c> UnitOfWork<'c> {
    /// Begins a transaction and, if a tenant context is present, applies it
    /// as transaction-local Postgres session settings before returning.
    pub async fn begin(pool: &PgPool, tenant: Option<TenantContext>) -> Result<Self, RepoError> {
        let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

        if let Some(ctx) = &tenant {
            for (key, value) in ctx.session_settings() {
                sqlx::query("SELECT set_config($1, $2, true)")
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
            }
        }

        Ok(Self {
            tx,
            tenant,
            pending: Vec::new(),
            committed: false,
        })
    }

    pub fn tenant(&self) -> Option<&TenantContext> {
        self.tenant.as_ref()
    }

    /// Borrow the live transaction/connection for repository calls.
    pub fn conn(&mut self) -> &mut sqlx::PgConnection {
        &mut self.tx
    }

    /// Accumulates events drained from a mutated aggregate. May be called
    /// multiple times per UoW (once per tracked aggregate); draining the
    /// aggregate's own buffer before calling this prevents duplicates.
    pub fn track_events(&mut self, events: Vec<Box<dyn DomainEvent>>) {
        self.pending
            .extend(events.iter().map(|e| OutboxDraft::from_event(e.as_ref())));
    }

    /// Drains accumulated events into the outbox, then commits. Event
    /// serialization/insertion happens strictly before `COMMIT` so the
    /// business mutation and the outbox row are atomic: either both persist
    /// or neither does.
    pub async fn commit(mut self) -> Result<(), RepoError> {
        for draft in &self.pending {
            write_event(&mut self.tx, draft).await?;
        }
        self.tx.commit().await.map_err(map_sqlx_error)?;
        self.committed = true;
        debug!(events = self.pending.len(), "unit of work committed");
        Ok(())
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!("unit of work dropped without commit; transaction will roll back");
        }
    }
}
