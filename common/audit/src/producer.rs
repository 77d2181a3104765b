use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{AuditActor, AuditError, AuditEvent, AuditResult, AuditSeverity, AUDIT_EVENT_VERSION};

/// Fan-out destination for audit events. The durable `AuditLog` row (written
/// via `crate::log::record`) is always the system of record; a sink is an
/// additional, best-effort observability channel — a failed sink emit never
/// fails the audit write itself.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: &AuditEvent) -> AuditResult<()>;
}

/// Discards events. Used in tests and local development without Kafka.
#[derive(Clone, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn emit(&self, _event: &AuditEvent) -> AuditResult<()> {
        Ok(())
    }
}

/// Captures emitted events in memory; used by tests that assert on what was
/// published without standing up a broker.
#[derive(Clone, Default)]
pub struct BufferedAuditProducer {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl BufferedAuditProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit buffer poisoned").clone()
    }
}

#[async_trait]
impl AuditSink for BufferedAuditProducer {
    async fn emit(&self, event: &AuditEvent) -> AuditResult<()> {
        self.events
            .lock()
            .expect("audit buffer poisoned")
            .push(event.clone());
        Ok(())
    }
}

#[cfg(feature = "kafka-producer")]
mod kafka_sink {
    use super::*;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use std::time::Duration;

    #[derive(Clone)]
    pub struct KafkaAuditSink {
        producer: FutureProducer,
        topic: String,
    }

    impl KafkaAuditSink {
        pub fn new(producer: FutureProducer, topic: impl Into<String>) -> Self {
            Self {
                producer,
                topic: topic.into(),
            }
        }
    }

    #[async_trait]
    impl AuditSink for KafkaAuditSink {
        async fn emit(&self, event: &AuditEvent) -> AuditResult<()> {
            let serialized =
                serde_json::to_vec(event).map_err(|e| AuditError::Serialization(e.to_string()))?;
            let key = event
                .tenant_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "global".to_string());
            let record = FutureRecord::to(&self.topic).key(&key).payload(&serialized);
            self.producer
                .send(record, Duration::from_secs(5))
                .await
                .map_err(|(err, _)| AuditError::Kafka(err.to_string()))?;
            Ok(())
        }
    }
}

#[cfg(feature = "kafka-producer")]
pub use kafka_sink::KafkaAuditSink;

/// Builds `AuditEvent`s and fans them out to a configured sink. Does not
/// itself write the `AuditLog` database row; see `crate::log::record`.
#[derive(Clone)]
pub struct AuditProducer {
    sink: Arc<dyn AuditSink>,
    source_service: String,
}

impl AuditProducer {
    pub fn new(sink: Arc<dyn AuditSink>, source_service: impl Into<String>) -> Self {
        Self {
            sink,
            source_service: source_service.into(),
        }
    }

    pub fn noop(source_service: impl Into<String>) -> Self {
        Self::new(Arc::new(NoopAuditSink), source_service)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn emit(
        &self,
        tenant_id: Option<Uuid>,
        actor: AuditActor,
        entity_type: impl Into<String>,
        entity_id: Option<Uuid>,
        action: impl Into<String>,
        severity: AuditSeverity,
        trace_id: Option<Uuid>,
        payload: serde_json::Value,
        meta: serde_json::Value,
    ) -> AuditEvent {
        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            event_version: AUDIT_EVENT_VERSION,
            tenant_id,
            actor,
            entity_type: entity_type.into(),
            entity_id,
            action: action.into(),
            occurred_at: Utc::now(),
            source_service: self.source_service.clone(),
            severity,
            trace_id,
            payload,
            meta,
        };

        if let Err(err) = self.sink.emit(&event).await {
            tracing::warn!(error = %err, action = %event.action, "failed to publish audit event to side channel");
        }

        event
    }
}

pub fn extract_actor_from_headers(
    headers: &axum::http::HeaderMap,
    claims_raw: &serde_json::Value,
    subject: uuid::Uuid,
) -> AuditActor {
    use axum::http::HeaderMap;
    fn header_str(map: &HeaderMap, name: &str) -> Option<String> {
        map.get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
    let mut actor = AuditActor {
        id: Some(subject),
        name: None,
        email: None,
    };
    actor.name = claims_raw.get("name").and_then(|v| v.as_str()).map(|s| s.to_string());
    actor.email = claims_raw.get("email").and_then(|v| v.as_str()).map(|s| s.to_string());
    if let Some(v) = header_str(headers, "X-User-ID").and_then(|s| uuid::Uuid::parse_str(&s).ok()) {
        actor.id = Some(v);
    }
    if let Some(v) = header_str(headers, "X-User-Name") {
        actor.name = Some(v);
    }
    if let Some(v) = header_str(headers, "X-User-Email") {
        actor.email = Some(v);
    }
    actor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_sink_captures_events() {
        let buffer = BufferedAuditProducer::new();
        let producer = AuditProducer::new(Arc::new(buffer.clone()), "identity-service");
        producer
            .emit(
                Some(Uuid::new_v4()),
                AuditActor::default(),
                "user",
                None,
                "login_success",
                AuditSeverity::Info,
                None,
                serde_json::json!({}),
                serde_json::json!({}),
            )
            .await;
        assert_eq!(buffer.events().len(), 1);
        assert_eq!(buffer.events()[0].action, "login_success");
    }
}
