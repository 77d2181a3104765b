use chrono::{DateTime, Utc};
use common_db::EventBuffer;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::events::{MessageSendRequested, MessageStatusChanged};
use crate::domain::DomainError;

const MAX_RETRY_COUNT: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    /// Whether this status accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Read | MessageStatus::Failed)
    }

    fn can_transition_to(&self, next: MessageStatus) -> bool {
        matches!(
            (self, next),
            (MessageStatus::Queued, MessageStatus::Sent)
                | (MessageStatus::Queued, MessageStatus::Failed)
                | (MessageStatus::Sent, MessageStatus::Delivered)
                | (MessageStatus::Sent, MessageStatus::Failed)
                | (MessageStatus::Delivered, MessageStatus::Read)
        )
    }
}

/// A single outbound or inbound WhatsApp message, tracked through its
/// provider delivery lifecycle. Outbound sends are deduplicated by
/// `idempotency_key` at creation time; status afterwards only ever moves
/// forward through the FSM enforced by `transition_to`.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub channel_id: Uuid,
    pub direction: MessageDirection,
    pub to_phone: String,
    pub from_phone: String,
    pub template_id: Option<Uuid>,
    pub content: serde_json::Value,
    pub content_hash: String,
    pub status: MessageStatus,
    pub whatsapp_message_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub(crate) events: EventBuffer,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn queue_outbound(
        organization_id: Uuid,
        channel_id: Uuid,
        to_phone: String,
        from_phone: String,
        template_id: Option<Uuid>,
        content: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<Self, DomainError> {
        if to_phone.trim().is_empty() {
            return Err(DomainError::Validation("to_phone cannot be empty".into()));
        }

        let content_hash = hash_content(&content);
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut events = EventBuffer::default();
        events.push(MessageSendRequested {
            aggregate_id: id,
            organization_id: Some(organization_id),
            channel_id,
            to_phone: to_phone.clone(),
        });

        Ok(Self {
            id,
            organization_id,
            channel_id,
            direction: MessageDirection::Outbound,
            to_phone,
            from_phone,
            template_id,
            content,
            content_hash,
            status: MessageStatus::Queued,
            whatsapp_message_id: None,
            idempotency_key,
            error_code: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            events,
        })
    }

    pub fn record_inbound(
        organization_id: Uuid,
        channel_id: Uuid,
        from_phone: String,
        to_phone: String,
        whatsapp_message_id: String,
        content: serde_json::Value,
    ) -> Self {
        let content_hash = hash_content(&content);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            channel_id,
            direction: MessageDirection::Inbound,
            to_phone,
            from_phone,
            template_id: None,
            content,
            content_hash,
            status: MessageStatus::Delivered,
            whatsapp_message_id: Some(whatsapp_message_id),
            idempotency_key: None,
            error_code: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            events: EventBuffer::default(),
        }
    }

    fn transition_to(&mut self, next: MessageStatus) -> Result<(), DomainError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition(format!(
                "cannot move message from {} to {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        self.events.push(MessageStatusChanged {
            aggregate_id: self.id,
            organization_id: Some(self.organization_id),
            status: next.as_str().to_string(),
        });
        Ok(())
    }

    pub fn mark_sent(&mut self, whatsapp_message_id: String) -> Result<(), DomainError> {
        self.whatsapp_message_id = Some(whatsapp_message_id);
        self.transition_to(MessageStatus::Sent)
    }

    pub fn mark_delivered(&mut self) -> Result<(), DomainError> {
        self.transition_to(MessageStatus::Delivered)
    }

    pub fn mark_read(&mut self) -> Result<(), DomainError> {
        self.transition_to(MessageStatus::Read)
    }

    /// Records a send failure. Retries up to `MAX_RETRY_COUNT` leave the
    /// message `queued` for the outbox worker to re-attempt; once retries are
    /// exhausted the message moves to the terminal `failed` state.
    pub fn mark_failed(&mut self, error_code: String) -> Result<(), DomainError> {
        self.error_code = Some(error_code);
        if self.status == MessageStatus::Queued && self.retry_count < MAX_RETRY_COUNT {
            self.retry_count += 1;
            self.updated_at = Utc::now();
            return Ok(());
        }
        self.transition_to(MessageStatus::Failed)
    }

    pub fn is_retryable(&self) -> bool {
        self.status == MessageStatus::Queued && self.retry_count < MAX_RETRY_COUNT
    }

    /// Re-queues a message that landed in the terminal `failed` state after
    /// exhausting its automatic retries, for an operator-triggered retry.
    pub fn reset_for_retry(&mut self) -> Result<(), DomainError> {
        if self.status != MessageStatus::Failed {
            return Err(DomainError::InvalidTransition(
                "only a failed message can be manually retried".into(),
            ));
        }
        self.retry_count = 0;
        self.error_code = None;
        self.status = MessageStatus::Queued;
        self.updated_at = Utc::now();
        self.events.push(MessageStatusChanged {
            aggregate_id: self.id,
            organization_id: Some(self.organization_id),
            status: MessageStatus::Queued.as_str().to_string(),
        });
        Ok(())
    }

    pub fn drain_events(&mut self) -> Vec<Box<dyn common_db::DomainEvent>> {
        self.events.drain_events()
    }
}

fn hash_content(content: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message::queue_outbound(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "+15551234567".into(),
            "+15557654321".into(),
            None,
            serde_json::json!({"body": "hello"}),
            Some("idem-1".into()),
        )
        .unwrap()
    }

    #[test]
    fn legal_transitions_succeed() {
        let mut message = sample();
        message.mark_sent("wamid.1".into()).unwrap();
        assert_eq!(message.status, MessageStatus::Sent);
        message.mark_delivered().unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
        message.mark_read().unwrap();
        assert_eq!(message.status, MessageStatus::Read);
    }

    #[test]
    fn illegal_transition_rejected() {
        let mut message = sample();
        assert!(message.mark_read().is_err());
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut message = sample();
        for _ in 0..MAX_RETRY_COUNT {
            message.mark_failed("rate_limited".into()).unwrap();
        }
        assert_eq!(message.status, MessageStatus::Failed);
        assert!(message.mark_sent("wamid.1".into()).is_err());
    }

    #[test]
    fn retries_stay_queued_until_exhausted() {
        let mut message = sample();
        message.mark_failed("temporary_error".into()).unwrap();
        assert_eq!(message.status, MessageStatus::Queued);
        assert_eq!(message.retry_count, 1);
        assert!(message.is_retryable());
    }

    #[test]
    fn content_hash_is_deterministic() {
        let a = sample();
        let b = Message::queue_outbound(
            a.organization_id,
            a.channel_id,
            a.to_phone.clone(),
            a.from_phone.clone(),
            None,
            serde_json::json!({"body": "hello"}),
            None,
        )
        .unwrap();
        assert_eq!(a.content_hash, b.content_hash);
    }
}
