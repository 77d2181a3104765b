use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

/// Side-channel publisher for security-relevant activity that the durable
/// `AuditLog` row also records but that downstream monitoring wants on a
/// dedicated topic rather than mined out of the audit trail.
#[async_trait]
pub trait KafkaProducer: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: String) -> Result<()>;
}

/// Used when the `kafka` feature is off: the call sites still run, they
/// just have nothing to publish to.
pub struct NoopProducer;

#[async_trait]
impl KafkaProducer for NoopProducer {
    async fn send(&self, _topic: &str, _key: &str, _payload: String) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "kafka")]
#[async_trait]
impl KafkaProducer for rdkafka::producer::FutureProducer {
    async fn send(&self, topic: &str, key: &str, payload: String) -> Result<()> {
        use std::time::Duration;
        rdkafka::producer::FutureProducer::send(
            self,
            rdkafka::producer::FutureRecord::to(topic).payload(&payload).key(key),
            Duration::from_secs(0),
        )
        .await
        .map_err(|(err, _)| anyhow!("failed to publish MFA activity: {err}"))?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct MfaActivityEvent {
    pub action: &'static str,
    pub severity: &'static str,
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub trace_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuspiciousLoginPayload {
    pub text: String,
}

pub async fn publish_mfa_activity(producer: &dyn KafkaProducer, topic: &str, event: &MfaActivityEvent) -> Result<()> {
    if topic.trim().is_empty() {
        return Ok(());
    }
    let payload = serde_json::to_string(event)?;
    let key = event.tenant_id.to_string();
    producer.send(topic, &key, payload).await
}

pub async fn post_suspicious_webhook(
    client: &Client,
    url: &str,
    bearer: Option<&str>,
    payload: &SuspiciousLoginPayload,
) -> Result<()> {
    let mut request = client.post(url).json(payload);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(anyhow!("security webhook returned status {}", response.status()));
    }
    Ok(())
}
