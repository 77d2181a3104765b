use uuid::Uuid;

/// A domain event raised by an aggregate during a business operation.
///
/// Aggregates accumulate these internally and expose them only through
/// `drain_events`, which clears the pending list atomically so nothing above
/// the aggregate can observe or mutate it in place (see `AggregateRoot`).
pub trait DomainEvent: Send + Sync {
    /// The event's type name, used as `outbox_events.event_type`.
    fn event_type(&self) -> &'static str;
    /// The owning aggregate's type name, used as `outbox_events.aggregate_type`.
    fn aggregate_type(&self) -> &'static str;
    fn aggregate_id(&self) -> Uuid;
    /// `None` only for events raised by admin-scoped operations that span tenants.
    fn organization_id(&self) -> Option<Uuid>;
    /// Deterministic JSON payload: UUIDs as strings, timestamps as RFC 3339.
    fn payload(&self) -> serde_json::Value;
}

/// Helper embedded in aggregate roots to accumulate events and drain them
/// exactly once per unit of work, mirroring `drain_events()` in the design
/// notes rather than exposing the backing `Vec` for external mutation.
#[derive(Default)]
pub struct EventBuffer(Vec<Box<dyn DomainEvent>>);

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: impl DomainEvent + 'static) {
        self.0.push(Box::new(event));
    }

    /// Clears the buffer and returns everything accumulated so far.
    pub fn drain_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl DomainEvent for Noop {
        fn event_type(&self) -> &'static str {
            "noop"
        }
        fn aggregate_type(&self) -> &'static str {
            "test"
        }
        fn aggregate_id(&self) -> Uuid {
            Uuid::nil()
        }
        fn organization_id(&self) -> Option<Uuid> {
            None
        }
        fn payload(&self) -> serde_json::Value {
            serde_json::json!({})
        }
    }

    #[test]
    fn drain_clears_buffer() {
        let mut buf = EventBuffer::new();
        buf.push(Noop);
        buf.push(Noop);
        assert_eq!(buf.drain_events().len(), 2);
        assert!(buf.is_empty());
        assert!(buf.drain_events().is_empty());
    }
}
