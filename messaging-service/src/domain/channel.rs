use chrono::{DateTime, Duration, Utc};
use common_crypto::{self, CryptoError, MasterKey};
use common_db::EventBuffer;
use uuid::Uuid;

use crate::domain::events::{ChannelCreated, ChannelDeactivated, ChannelSuspended};
use crate::domain::DomainError;

/// Default token-bucket shape for a freshly created channel, matching the
/// WhatsApp Cloud API's default per-number throughput.
pub const DEFAULT_RATE_LIMIT_PER_SECOND: i32 = 80;
const USAGE_PERIOD_DAYS: i64 = 30;

impl From<CryptoError> for DomainError {
    fn from(err: CryptoError) -> Self {
        DomainError::Internal(format!("channel secret crypto failure: {err}"))
    }
}

/// A WhatsApp Business phone number onboarded to a tenant. The provider
/// access token and webhook signing secret are envelope-encrypted: a random
/// per-channel data-encryption key (DEK) is generated at creation, wrapped
/// with the process-wide master key, and used to encrypt both secrets. The
/// wrapped DEK travels alongside the ciphertexts so any row can be decrypted
/// independently of the others.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub phone_number_id: String,
    pub business_phone: String,
    pub encrypted_access_token: Vec<u8>,
    pub encrypted_webhook_secret: Vec<u8>,
    pub encrypted_dek: Vec<u8>,
    pub rate_limit_per_second: i32,
    pub monthly_message_limit: i32,
    pub is_active: bool,
    pub is_suspended: bool,
    pub messages_sent_this_period: i64,
    pub usage_period_start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub(crate) events: EventBuffer,
}

impl Channel {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        organization_id: Uuid,
        phone_number_id: String,
        business_phone: String,
        access_token_plain: &str,
        webhook_secret_plain: &str,
        rate_limit_per_second: i32,
        monthly_message_limit: i32,
        master_key: &MasterKey,
    ) -> Result<Self, DomainError> {
        if phone_number_id.trim().is_empty() {
            return Err(DomainError::Validation("phone_number_id cannot be empty".into()));
        }
        if rate_limit_per_second <= 0 {
            return Err(DomainError::Validation("rate_limit_per_second must be positive".into()));
        }
        if monthly_message_limit <= 0 {
            return Err(DomainError::Validation("monthly_message_limit must be positive".into()));
        }

        let dek = common_crypto::generate_dek();
        let encrypted_dek = master_key.encrypt_tenant_dek(&dek)?;
        let encrypted_access_token = common_crypto::encrypt_field(&dek, access_token_plain.as_bytes())?;
        let encrypted_webhook_secret = common_crypto::encrypt_field(&dek, webhook_secret_plain.as_bytes())?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut events = EventBuffer::default();
        events.push(ChannelCreated {
            aggregate_id: id,
            organization_id: Some(organization_id),
            phone_number_id: phone_number_id.clone(),
        });

        Ok(Self {
            id,
            organization_id,
            phone_number_id,
            business_phone,
            encrypted_access_token,
            encrypted_webhook_secret,
            encrypted_dek,
            rate_limit_per_second,
            monthly_message_limit,
            is_active: true,
            is_suspended: false,
            messages_sent_this_period: 0,
            usage_period_start: now,
            created_at: now,
            updated_at: now,
            events,
        })
    }

    fn dek(&self, master_key: &MasterKey) -> Result<[u8; 32], DomainError> {
        Ok(master_key.decrypt_tenant_dek(&self.encrypted_dek)?)
    }

    pub fn decrypt_access_token(&self, master_key: &MasterKey) -> Result<String, DomainError> {
        let dek = self.dek(master_key)?;
        let plaintext = common_crypto::decrypt_field(&dek, &self.encrypted_access_token)?;
        String::from_utf8(plaintext).map_err(|_| DomainError::Internal("decrypted access token was not valid UTF-8".into()))
    }

    pub fn decrypt_webhook_secret(&self, master_key: &MasterKey) -> Result<String, DomainError> {
        let dek = self.dek(master_key)?;
        let plaintext = common_crypto::decrypt_field(&dek, &self.encrypted_webhook_secret)?;
        String::from_utf8(plaintext).map_err(|_| DomainError::Internal("decrypted webhook secret was not valid UTF-8".into()))
    }

    /// Whether the channel is currently usable for sending. Both inactive
    /// (deactivated by an operator or by a token-invalid webhook status) and
    /// suspended (rate-limit-code or provider-flagged) channels reject sends.
    pub fn is_sendable(&self) -> bool {
        self.is_active && !self.is_suspended
    }

    pub fn deactivate(&mut self) {
        if !self.is_active {
            return;
        }
        self.is_active = false;
        self.updated_at = Utc::now();
        self.events.push(ChannelDeactivated {
            aggregate_id: self.id,
            organization_id: Some(self.organization_id),
        });
    }

    pub fn suspend(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.is_suspended = true;
        self.updated_at = Utc::now();
        self.events.push(ChannelSuspended {
            aggregate_id: self.id,
            organization_id: Some(self.organization_id),
            reason,
        });
    }

    pub fn lift_suspension(&mut self) {
        self.is_suspended = false;
        self.updated_at = Utc::now();
    }

    /// Messages sent so far in the current usage period, rolling the period
    /// over on read rather than via a wall-clock cron: a missed tick can
    /// never leave the counter stuck past its window (see open question on
    /// monthly quota resets).
    pub fn usage_sent_this_period(&self, now: DateTime<Utc>) -> i64 {
        if now - self.usage_period_start >= Duration::days(USAGE_PERIOD_DAYS) {
            0
        } else {
            self.messages_sent_this_period
        }
    }

    pub fn quota_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.monthly_message_limit as i64 - self.usage_sent_this_period(now)).max(0)
    }

    /// Records one outbound send against the monthly quota, rolling the
    /// period start forward first if it has elapsed.
    pub fn record_send(&mut self, now: DateTime<Utc>) {
        if now - self.usage_period_start >= Duration::days(USAGE_PERIOD_DAYS) {
            self.usage_period_start = now;
            self.messages_sent_this_period = 0;
        }
        self.messages_sent_this_period += 1;
        self.updated_at = now;
    }

    pub fn drain_events(&mut self) -> Vec<Box<dyn common_db::DomainEvent>> {
        self.events.drain_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MasterKey {
        MasterKey::from_bytes([7u8; 32]).unwrap()
    }

    #[test]
    fn create_round_trips_secrets() {
        let channel = Channel::create(
            Uuid::new_v4(),
            "123456".into(),
            "+15551234567".into(),
            "provider-access-token",
            "webhook-secret",
            80,
            10_000,
            &key(),
        )
        .unwrap();

        assert_eq!(channel.decrypt_access_token(&key()).unwrap(), "provider-access-token");
        assert_eq!(channel.decrypt_webhook_secret(&key()).unwrap(), "webhook-secret");
    }

    #[test]
    fn rejects_non_positive_limits() {
        assert!(Channel::create(
            Uuid::new_v4(),
            "123456".into(),
            "+15551234567".into(),
            "token",
            "secret",
            0,
            10_000,
            &key(),
        )
        .is_err());
    }

    #[test]
    fn quota_resets_after_period_elapses() {
        let mut channel = Channel::create(
            Uuid::new_v4(),
            "123456".into(),
            "+15551234567".into(),
            "token",
            "secret",
            80,
            10,
            &key(),
        )
        .unwrap();
        channel.drain_events();
        let now = channel.usage_period_start;
        channel.record_send(now);
        assert_eq!(channel.quota_remaining(now), 9);

        let later = now + Duration::days(31);
        assert_eq!(channel.quota_remaining(later), 10);
        channel.record_send(later);
        assert_eq!(channel.messages_sent_this_period, 1);
    }
}
