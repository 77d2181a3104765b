pub mod log;
pub mod model;
pub mod producer;

pub use log::record as record_audit_log;
pub use model::{AuditActor, AuditError, AuditEvent, AuditResult, AuditSeverity, AUDIT_EVENT_VERSION};
pub use producer::{
    extract_actor_from_headers, AuditProducer, AuditSink, BufferedAuditProducer, NoopAuditSink,
};
#[cfg(feature = "kafka-producer")]
pub use producer::KafkaAuditSink;
